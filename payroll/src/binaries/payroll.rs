use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::utils::format_ether;
use alloy::providers::{Provider, WalletProvider};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use payroll::{ChainContext, Contracts, ModeSelector, gateway_client};
use payroll_config::PayrollConfig;
use payroll_contract::provider::build_provider;
use payroll_types::{GatewayStatus, Mode, SubjectId};
use payroll_utils::logging;
use relayer::{Client, HealthMonitor};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::{select, signal, spawn};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "payroll", about = "Confidential payroll client")]
struct Cli {
    /// Path to the configuration file.
    #[clap(long, short)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decrypt your salary of a payroll plan.
    Decrypt(DecryptArgs),

    /// Probe the gateway once and show the selected mode.
    Status,

    /// Follow gateway health and mode changes until interrupted.
    Monitor,
}

#[derive(Args, Debug)]
struct DecryptArgs {
    /// Payroll plan id.
    #[clap(long)]
    plan: u64,

    /// Mnemonic of the employee wallet.
    #[clap(long, env = "PAYROLL_MNEMONIC", hide_env_values = true)]
    mnemonic: String,

    /// Account index of the employee wallet.
    #[clap(long, default_value_t = 0)]
    account_index: u32,

    /// Try even if the gateway looks unreachable.
    #[clap(long, default_value_t = false)]
    force: bool,

    /// Do not offer a retry after a transient failure.
    #[clap(long, default_value_t = false)]
    no_retry: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cli = Cli::parse();

    let config = PayrollConfig::read(&cli.config)
        .await
        .with_context(|| format!("could not read payroll config {:?}", cli.config))?;

    match cli.command {
        Command::Decrypt(args) => decrypt(&config, args).await,
        Command::Status => status(&config).await,
        Command::Monitor => monitor(&config).await,
    }
}

async fn decrypt(config: &PayrollConfig, args: DecryptArgs) -> Result<()> {
    let provider = build_provider(
        args.mnemonic,
        args.account_index,
        config.chain.rpc_url.clone(),
    )
    .context("could not create wallet from mnemonic")?;

    let chain_id = provider
        .get_chain_id()
        .await
        .with_context(|| format!("could not reach {}", config.chain.rpc_url))?;
    if chain_id != config.chain.id {
        bail!(
            "rpc chain id {chain_id} does not match configured chain id {}",
            config.chain.id
        )
    }

    let subject = SubjectId::new(args.plan, provider.default_signer_address());
    let mut ctx = ChainContext::from_config(config, provider)?;

    let selection = ctx.start(config.gateway.health_check_interval()).await;
    if selection.mode != Mode::Privacy {
        if !args.force {
            bail!(
                "gateway {} is unreachable, running in {} mode (use --force to try anyway)",
                config.gateway.base_url,
                selection.mode
            )
        }
        ctx.selector().set_mode_manually(Mode::Privacy);
    }

    let mut events = ctx.coordinator().subscribe();
    let printer = spawn(async move {
        while let Some(e) = events.recv().await {
            eprintln!("[{:>4}] {}", e.progress, e.state)
        }
    });

    let mut result = ctx.decrypt(subject).await;
    let outcome = loop {
        match result {
            Ok(d) => break Ok(d),
            Err(payroll::Error::Decrypt(err)) if err.is_retryable() && !args.no_retry => {
                eprintln!("{err}");
                if !confirm("retry decryption? [y/N] ").await? {
                    break Err(err.into());
                }
                result = ctx.retry(subject).await;
            }
            Err(err) => break Err(anyhow::Error::from(err)),
        }
    };

    drop(ctx);
    let _ = printer.await;

    let d = outcome.with_context(|| format!("could not decrypt salary of plan {}", args.plan))?;
    println!(
        "plan {}: {} wei ({} ETH)",
        d.subject.plan(),
        d.value,
        format_ether(d.value)
    );
    Ok(())
}

async fn status(config: &PayrollConfig) -> Result<()> {
    let (monitor, selector) = watcher(config)?;
    monitor.refresh().await;
    selector.reconcile();
    println!("gateway:  {}", monitor.state().status);
    println!("mode:     {}", selector.mode());
    println!("contract: {}", selector.active_contract());
    Ok(())
}

async fn monitor(config: &PayrollConfig) -> Result<()> {
    let (monitor, selector) = watcher(config)?;
    monitor.refresh().await;
    selector.reconcile();
    info!(gateway = %monitor.state().status, mode = %selector.mode(), "monitoring");

    let mut states = monitor.subscribe();
    let mut modes = selector.subscribe();
    let handle = monitor.start_monitoring(
        {
            let s = selector.clone();
            move |_| {
                s.reconcile();
            }
        },
        config.gateway.health_check_interval(),
    );

    loop {
        select! {
            _ = signal::ctrl_c() => break,
            Ok(()) = states.changed() => {
                let s = *states.borrow_and_update();
                if s.status != GatewayStatus::Checking {
                    info!(gateway = %s.status, "gateway probed")
                }
            }
            Ok(()) = modes.changed() => {
                let m = *modes.borrow_and_update();
                info!(
                    mode = %m.mode,
                    contract = %selector.contracts().for_mode(m.mode),
                    "mode changed"
                )
            }
        }
    }

    handle.cancel();
    Ok(())
}

fn watcher(config: &PayrollConfig) -> Result<(HealthMonitor<Client>, ModeSelector)> {
    let gateway = gateway_client(&config.gateway, config.chain.id)
        .context("could not create gateway client")?;
    let monitor = HealthMonitor::new(Arc::new(gateway));
    let contracts = Contracts {
        confidential: config.chain.confidential_contract,
        fallback: config.chain.fallback_contract,
    };
    let selector = ModeSelector::new(monitor.subscribe(), contracts);
    Ok((monitor, selector))
}

async fn confirm(prompt: &str) -> Result<bool> {
    let mut out = tokio::io::stderr();
    out.write_all(prompt.as_bytes()).await?;
    out.flush().await?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}
