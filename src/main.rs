use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use uuid::Uuid;

use cm_onboard::config::EngineConfig;
use cm_onboard::context::RequestContext;
use cm_onboard::gateway::{CmGateway, GatewayConfig, HttpCmGateway};
use cm_onboard::orchestrator::{LoggingProvisioner, OnboardingOrchestrator, StepResult};
use cm_onboard::record::{OnboardingRecord, Stage};
use cm_onboard::store::{LibSqlStore, OnboardingStore};
use cm_onboard::translation::{ReferenceRow, TranslationCache, spawn_refresh_task};

const USAGE: &str = "usage: cm-onboard <command> [args]

commands:
  submit <record.json>     capture a new record
  show <id>                print a record
  history <id>             print a record's activity trail
  kyc <id>                 release a record to KYC
  approve <id>             approve a record and send it to CM
  retry <id>               resubmit a record waiting in RETRY
  reopen <id>              move a FAILED record back to RETRY
  pending [STAGE]          list records in a stage (default RETRY)
  party <id>               show CM's view of a record's party
  import-codes <file.csv>  load translation rows (category,group,source,code)";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let arg = args.get(1).map(String::as_str);

    let config = EngineConfig::from_env()?;

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("ONBOARD_DB_PATH").unwrap_or_else(|_| "./data/onboarding.db".to_string());
    let store: Arc<dyn OnboardingStore> = Arc::new(
        LibSqlStore::new_local(Path::new(&db_path))
            .await
            .with_context(|| format!("failed to open database at {db_path}"))?,
    );

    if command == "import-codes" {
        let path = arg.context("import-codes needs a CSV file")?;
        let imported = import_codes(store.as_ref(), Path::new(path)).await?;
        println!("imported {imported} translation rows");
        return Ok(());
    }

    // ── Engine ───────────────────────────────────────────────────────────
    let gateway: Arc<dyn CmGateway> = Arc::new(HttpCmGateway::new(GatewayConfig::from_env()?)?);
    let translations = Arc::new(TranslationCache::load(store.as_ref()).await?);
    let _refresh_handle = spawn_refresh_task(
        translations.clone(),
        store.clone(),
        config.translation_refresh_interval,
    );

    let engine = OnboardingOrchestrator::new(
        store,
        gateway,
        Arc::new(LoggingProvisioner),
        translations,
        config,
    )?;
    let actor = std::env::var("ONBOARD_ACTOR").unwrap_or_else(|_| "operator".to_string());
    let ctx = RequestContext::new(actor);

    match command {
        "submit" => {
            let path = arg.context("submit needs a record JSON file")?;
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {path}"))?;
            let record: OnboardingRecord =
                serde_json::from_str(&raw).context("record JSON does not parse")?;
            print_step(&engine.submit_initial(record, &ctx).await?)?;
        }
        "show" => print_json(&engine.get(parse_id(arg)?).await?)?,
        "history" => print_json(&engine.history(parse_id(arg)?).await?)?,
        "kyc" => print_step(&engine.release_to_kyc(parse_id(arg)?, &ctx).await?)?,
        "approve" => print_step(&engine.approve(parse_id(arg)?, &ctx).await?)?,
        "retry" => print_step(&engine.retry(parse_id(arg)?, &ctx).await?)?,
        "reopen" => print_step(&engine.reopen(parse_id(arg)?, &ctx).await?)?,
        "pending" => {
            let stage: Stage = match arg {
                Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
                None => Stage::Retry,
            };
            for record in engine.records_in_stage(stage).await? {
                println!("{}  {}  {}  {}", record.id, record.entity_kind, record.status, record.name);
            }
        }
        "party" => match engine.external_party(parse_id(arg)?).await? {
            Some(party) => print_json(&party)?,
            None => println!("no CM party assigned yet"),
        },
        other => bail!("unknown command {other:?}\n\n{USAGE}"),
    }

    Ok(())
}

fn parse_id(arg: Option<&str>) -> anyhow::Result<Uuid> {
    let raw = arg.context("missing record id")?;
    Uuid::parse_str(raw).with_context(|| format!("{raw:?} is not a record id"))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_step(step: &StepResult) -> anyhow::Result<()> {
    print_json(&serde_json::json!({
        "outcome": step.outcome,
        "record": step.record,
        "activity": step.activity,
    }))
}

/// Load `category,group,source,code` lines. Blank lines and `#` comments are skipped.
async fn import_codes(store: &dyn OnboardingStore, path: &Path) -> anyhow::Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut count = 0;
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [category, group, source, code] = fields.as_slice() else {
            bail!("line {}: expected 4 comma-separated fields", lineno + 1);
        };
        store
            .insert_reference_row(&ReferenceRow::new(*category, *group, *source, *code))
            .await?;
        count += 1;
    }
    Ok(count)
}
