use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use serde::Deserialize;
use tracing::{error, info};
use trigsync_core::object_name;
use trigsync_kubehub::{DeletionPropagation, KubeClient};
use trigsync_operator::{ApplyOptions, Callbacks, Context, DeleteOptions, Options, TriggersOperator};

#[derive(Parser, Debug)]
#[command(name = "trigsyncctl", version, about = "Reconcile the triggers owned by a function")]
struct Cli {
    /// Namespace of the function and its triggers
    #[arg(long = "ns", global = true, default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Target {
    /// Function owning the triggers
    #[arg(long = "function")]
    function: String,
    /// Multi-document YAML with the desired triggers
    #[arg(short = 'f', long = "file")]
    file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Remove orphans, then create or update every desired trigger
    Apply {
        #[command(flatten)]
        target: Target,
        /// Wait until each trigger is observed on a watch
        #[arg(long = "wait", action = ArgAction::SetTrue)]
        wait: bool,
        /// Give up waiting after this many seconds
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u64>,
        #[arg(long = "owner-api-version", default_value = "serverless.kyma-project.io/v1alpha2")]
        owner_api_version: String,
        #[arg(long = "owner-kind", default_value = "Function")]
        owner_kind: String,
        /// Defaults to the function name
        #[arg(long = "owner-name")]
        owner_name: Option<String>,
        #[arg(long = "owner-uid")]
        owner_uid: String,
    },
    /// Delete the desired triggers
    Delete {
        #[command(flatten)]
        target: Target,
        #[arg(long = "propagation", value_enum, default_value_t = Propagation::Background)]
        propagation: Propagation,
    },
    /// Delete triggers bound to the function that are no longer desired
    Prune {
        #[command(flatten)]
        target: Target,
    },
    /// Print triggers bound to the function that are no longer desired
    Orphans {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Propagation {
    Orphan,
    Background,
    Foreground,
}

impl From<Propagation> for DeletionPropagation {
    fn from(p: Propagation) -> Self {
        match p {
            Propagation::Orphan => DeletionPropagation::Orphan,
            Propagation::Background => DeletionPropagation::Background,
            Propagation::Foreground => DeletionPropagation::Foreground,
        }
    }
}

fn init_tracing() {
    let env = std::env::var("TRIGSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TRIGSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TRIGSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

/// Parse every non-empty YAML document as a trigger.
fn parse_triggers(yaml: &str) -> Result<Vec<DynamicObject>> {
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing YAML document {}", i))?;
        if val.is_null() {
            continue;
        }
        let json = serde_json::to_value(val).context("converting YAML to JSON")?;
        let obj: DynamicObject =
            serde_json::from_value(json).with_context(|| format!("YAML document {} is not a resource", i))?;
        if object_name(&obj).is_empty() {
            anyhow::bail!("YAML document {} missing metadata.name", i);
        }
        out.push(obj);
    }
    Ok(out)
}

fn load_triggers(path: &Path) -> Result<Vec<DynamicObject>> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_triggers(&yaml)
}

/// Callbacks reporting progress on stdout.
fn reporting_callbacks() -> Callbacks {
    Callbacks::default().on_post(|subject, prior| {
        let names = subject.names().join(", ");
        match prior {
            None => println!("ok      {}", names),
            Some(e) => println!("failed  {}: {}", names, e),
        }
        Ok(())
    })
}

async fn operator(namespace: &str, target: &Target) -> Result<TriggersOperator> {
    let items = load_triggers(&target.file)?;
    let client = KubeClient::try_default().await?;
    Ok(TriggersOperator::new(Arc::new(client), target.function.clone(), namespace, items))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ctx = Context::background();

    let res = match cli.command {
        Commands::Apply { target, wait, timeout_secs, owner_api_version, owner_kind, owner_name, owner_uid } => {
            let op = operator(&cli.namespace, &target).await?;
            let owner = OwnerReference {
                api_version: owner_api_version,
                kind: owner_kind,
                name: owner_name.unwrap_or_else(|| target.function.clone()),
                uid: owner_uid,
                ..Default::default()
            };
            let ctx = match timeout_secs {
                Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
                None => ctx,
            };
            info!(function = %op.function(), file = %target.file.display(), "apply invoked");
            let opts = ApplyOptions {
                owner_references: vec![owner],
                options: Options { wait_for_apply: wait, callbacks: reporting_callbacks() },
            };
            op.apply(&ctx, opts).await
        }
        Commands::Delete { target, propagation } => {
            let op = operator(&cli.namespace, &target).await?;
            let opts = DeleteOptions {
                deletion_propagation: propagation.into(),
                options: Options { callbacks: reporting_callbacks(), ..Default::default() },
            };
            op.delete(&ctx, opts).await
        }
        Commands::Prune { target } => {
            let op = operator(&cli.namespace, &target).await?;
            let opts = Options { callbacks: reporting_callbacks(), ..Default::default() };
            op.wipe_removed(&ctx, &opts).await
        }
        Commands::Orphans { target } => {
            let op = operator(&cli.namespace, &target).await?;
            op.orphans().await.map(|orphans| {
                for o in orphans {
                    println!("{}", object_name(&o));
                }
            })
        }
    };

    if let Err(e) = res {
        error!(error = %e, "command failed");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_document_yaml() {
        let yaml = "\
apiVersion: eventing.knative.dev/v1
kind: Trigger
metadata:
  name: order-created
spec:
  subscriber:
    ref: { kind: Service, name: pay, namespace: ns }
---
apiVersion: eventing.knative.dev/v1
kind: Trigger
metadata:
  name: order-paid
spec:
  subscriber:
    ref: { kind: Service, name: pay, namespace: ns }
";
        let items = parse_triggers(yaml).unwrap();
        let names: Vec<_> = items.iter().map(object_name).collect();
        assert_eq!(names, vec!["order-created", "order-paid"]);
    }

    #[test]
    fn rejects_document_without_name() {
        let err = parse_triggers("apiVersion: v1\nkind: Trigger\nmetadata: {}\n").unwrap_err().to_string();
        assert!(err.contains("missing metadata.name"), "err={}", err);
    }

    #[test]
    fn cli_parses_apply_flags() {
        let cli = Cli::try_parse_from([
            "trigsyncctl", "--ns", "ns", "apply", "--function", "pay", "-f", "t.yaml", "--wait", "--owner-uid", "123",
        ])
        .unwrap();
        assert_eq!(cli.namespace, "ns");
        match cli.command {
            Commands::Apply { target, wait, owner_uid, .. } => {
                assert_eq!(target.function, "pay");
                assert!(wait);
                assert_eq!(owner_uid, "123");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn propagation_flag_maps_to_policy() {
        assert_eq!(DeletionPropagation::from(Propagation::Foreground), DeletionPropagation::Foreground);
    }
}
