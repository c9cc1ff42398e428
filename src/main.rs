use std::{io::Write as _, process, sync::Arc};

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use vignette::{
    application::{
        backfill::{PipelineContext, run_backfill_tick},
        cleanup::{delete_orphans, find_orphans},
        error::AppError,
        inventory::media_inventory,
        regenerate::{Outcome, run_regeneration},
        repos::RegenerationScope,
        sync::run_sync_tick,
        variants::VariantGenerator,
    },
    config,
    infra::{
        db::PostgresRepositories,
        dispatch::AutomationClient,
        error::InfraError,
        scheduler::PeriodicLoop,
        storage::MediaStorage,
        telemetry,
    },
    util::bytes::format_bytes,
};

#[tokio::main]
async fn main() {
    let cli_args = match config::CliArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // clap routes --help and --version through this same path; only
            // genuine parse failures exit non-zero.
            let code = i32::from(err.use_stderr());
            let _ = err.print();
            process::exit(code);
        }
    };

    if let Err(error) = run(cli_args).await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run(cli_args: config::CliArgs) -> Result<(), AppError> {
    let settings = config::load(&cli_args)
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::RegenerateThumbnails(args) => run_regenerate(settings, args).await,
        config::Command::ListMedia(args) => run_list_media(settings, args).await,
        config::Command::CleanupThumbnails(args) => run_cleanup(settings, args).await,
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_pipeline_context(
    repo: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<PipelineContext, AppError> {
    let storage =
        MediaStorage::new(&settings.storage).map_err(|err| AppError::from(InfraError::Io(err)))?;
    let generator = VariantGenerator::new(storage.clone());
    Ok(PipelineContext {
        repo,
        storage,
        generator,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repo = init_repositories(&settings).await?;
    let ctx = build_pipeline_context(repo, &settings)?;
    let token = CancellationToken::new();

    let backfill_loop = PeriodicLoop::new("backfill", settings.backfill.interval)
        .with_startup_delay(settings.backfill.startup_delay);
    let batch_size = settings.backfill.batch_size.get();
    let backfill_ctx = ctx.clone();
    let backfill_token = token.clone();
    let backfill_handle = tokio::spawn(async move {
        let tick_token = backfill_token.clone();
        backfill_loop
            .run(backfill_token, move || {
                let ctx = backfill_ctx.clone();
                let token = tick_token.clone();
                async move { run_backfill_tick(&ctx, batch_size, &token).await.map(|_| ()) }
            })
            .await;
    });

    let sync_handle = match (settings.sync.endpoint.clone(), settings.sync.token.clone()) {
        (Some(endpoint), Some(api_token)) => {
            let client = AutomationClient::new(
                endpoint,
                api_token,
                settings.sync.event_type.clone(),
                settings.sync.source.clone(),
            )?;

            let sync_loop = PeriodicLoop::new("sync-dispatch", settings.sync.interval)
                .with_startup_delay(settings.sync.interval)
                .with_retry_cadence(settings.sync.retry_interval);
            let storage = ctx.storage.clone();
            let loop_token = token.clone();
            Some(tokio::spawn(async move {
                sync_loop
                    .run(loop_token, move || {
                        let storage = storage.clone();
                        let client = client.clone();
                        async move { run_sync_tick(&storage, &client).await }
                    })
                    .await;
            }))
        }
        _ => {
            info!(
                target: "vignette::sync",
                "sync dispatcher disabled; endpoint or token not configured"
            );
            None
        }
    };

    info!(target: "vignette", "serving; press Ctrl-C to stop");
    signal::ctrl_c()
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;
    info!(target: "vignette", "shutdown requested");

    token.cancel();
    let _ = backfill_handle.await;
    if let Some(handle) = sync_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn run_regenerate(
    settings: config::Settings,
    args: config::RegenerateArgs,
) -> Result<(), AppError> {
    let repo = init_repositories(&settings).await?;
    let ctx = build_pipeline_context(repo, &settings)?;

    let scope = RegenerationScope {
        force: args.force,
        id: args.id,
    };
    let report = run_regeneration(&ctx, scope).await?;

    if report.selected() == 0 {
        println!("No media items need regeneration.");
        return Ok(());
    }

    for item in &report.items {
        let outcome = match &item.outcome {
            Outcome::Regenerated => "regenerated".to_string(),
            Outcome::MissingSource => "skipped (missing source)".to_string(),
            Outcome::Failed(reason) => format!("FAILED: {reason}"),
        };
        println!("{:>6}  {:<40}  {outcome}", item.id, truncate(&item.title, 40));
    }

    println!(
        "\n{} regenerated, {} missing source, {} failed ({} selected)",
        report.processed(),
        report.missing(),
        report.failed(),
        report.selected()
    );

    if report.failed() > 0 {
        return Err(AppError::command_failed(format!(
            "{} of {} items failed",
            report.failed(),
            report.selected()
        )));
    }

    Ok(())
}

async fn run_list_media(
    settings: config::Settings,
    args: config::ListMediaArgs,
) -> Result<(), AppError> {
    let repo = init_repositories(&settings).await?;
    let rows = media_inventory(repo.as_ref(), args.all)
        .await
        .map_err(AppError::from)?;

    if rows.is_empty() {
        println!("No media items to report.");
        return Ok(());
    }

    println!("{:>6}  {:<12}  TITLE", "ID", "STATUS");
    for row in &rows {
        println!("{:>6}  {:<12}  {}", row.id, row.status.label(), row.title);
    }

    Ok(())
}

async fn run_cleanup(settings: config::Settings, args: config::CleanupArgs) -> Result<(), AppError> {
    let repo = init_repositories(&settings).await?;
    let storage =
        MediaStorage::new(&settings.storage).map_err(|err| AppError::from(InfraError::Io(err)))?;

    let report = find_orphans(repo.as_ref(), &storage).await?;

    if report.orphans.is_empty() {
        println!("No orphaned files found.");
        return Ok(());
    }

    println!(
        "{} orphaned files, {} total:",
        report.orphans.len(),
        format_bytes(report.total_bytes())
    );
    for orphan in &report.orphans {
        println!(
            "  {}  ({})",
            orphan.path.display(),
            format_bytes(orphan.size_bytes)
        );
    }

    if args.dry_run {
        println!("\nDry run; nothing deleted.");
        return Ok(());
    }

    print!("\nDelete {} files? [y/N] ", report.orphans.len());
    std::io::stdout()
        .flush()
        .map_err(|err| AppError::from(InfraError::Io(err)))?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|err| AppError::from(InfraError::Io(err)))?;
    if !answer.trim().eq_ignore_ascii_case("y") {
        println!("Cancelled.");
        return Ok(());
    }

    let deletion = delete_orphans(&storage, &report.orphans).await;
    println!("Deleted {}, failed {}.", deletion.deleted, deletion.failed);

    if deletion.failed > 0 {
        return Err(AppError::command_failed(format!(
            "{} of {} deletions failed",
            deletion.failed,
            report.orphans.len()
        )));
    }

    Ok(())
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
