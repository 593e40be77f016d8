//! Adaptive momentum trading bot.
//!
//! Scores a basket of spot instruments with a multi-factor signal, sizes
//! entries against volatility and conviction, and manages positions through
//! a laddered exit lifecycle under a portfolio risk governor.

mod bot;
mod db;
mod exchange;
mod indicators;
mod models;
mod risk;
mod trading;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bot::{Bot, BotConfig};
use crate::risk::RiskConfig;
use crate::trading::StrategyConfig;

/// Momentum trading bot CLI.
#[derive(Parser)]
#[command(name = "momentumbot")]
#[command(about = "Adaptive multi-factor momentum trading for spot markets", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./momentumbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loop
    Run {
        /// Symbols to trade (defaults to the built-in basket)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,

        /// Seconds between decision cycles
        #[arg(short, long, default_value = "300")]
        interval: u64,

        /// Starting equity for dry-run simulation
        #[arg(short, long, default_value = "1000")]
        equity: f64,

        /// Simulate fills instead of sending orders
        #[arg(long)]
        dry_run: bool,
    },

    /// Score the basket once and print the ranking
    Scan {
        /// Symbols to scan (defaults to the built-in basket)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,
    },

    /// Show open positions and recent actions
    Status,

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            symbols,
            interval,
            equity,
            dry_run,
        } => {
            let mut config = BotConfig {
                cycle_interval_secs: interval,
                dry_run,
                initial_equity: Decimal::try_from(equity)?,
                database_url: cli.database.clone(),
                ..Default::default()
            };
            if let Some(symbols) = symbols {
                config.symbols = symbols;
            }

            info!(
                symbols = config.symbols.len(),
                interval = interval,
                dry_run = dry_run,
                "Starting momentum bot"
            );

            let mut bot = Bot::new(config.clone()).await?;
            bot.initialize().await?;

            println!("\n=== Momentum Trading Bot ===");
            println!("Symbols:        {}", config.symbols.join(", "));
            println!("Cycle interval: {}s", interval);
            println!(
                "Mode:           {}",
                if dry_run {
                    "DRY RUN (simulated fills)"
                } else {
                    "LIVE TRADING"
                }
            );
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }
        }

        Commands::Scan { symbols } => {
            let symbols = symbols.unwrap_or_else(|| BotConfig::default().symbols);
            bot::scan(&symbols, &StrategyConfig::default()).await?;
        }

        Commands::Status => {
            bot::status(&cli.database).await?;
        }

        Commands::Config => {
            let strategy = StrategyConfig::default();
            let risk = RiskConfig::default();
            let bot = BotConfig::default();

            println!("\n=== Strategy Configuration ===\n");
            println!("Signal:");
            println!(
                "  Momentum lookbacks:   {}/{}/{} bars (1h)",
                strategy.momentum_lookback_short,
                strategy.momentum_lookback_medium,
                strategy.momentum_lookback_long
            );
            println!("  RSI period:           {}", strategy.rsi_period);
            println!(
                "  EMA fast/slow/trend:  {}/{}/{}",
                strategy.ema_fast, strategy.ema_slow, strategy.ema_trend
            );
            println!("  Volume surge:         x{}", strategy.volume_surge_threshold);

            println!("\nEntry Gates:");
            println!("  Min score:            {}", strategy.min_entry_score);
            println!("  Defensive min score:  {}", strategy.defensive_min_entry_score);
            println!("  RSI ceiling:          {}", strategy.rsi_entry_ceiling);
            println!("  Max correlation:      {}", strategy.max_correlation);

            println!("\nSizing:");
            println!("  Base position:        {}%", strategy.base_position_pct * Decimal::from(100));
            println!("  Max single position:  {}%", strategy.max_single_position_pct * Decimal::from(100));
            println!("  Max total exposure:   {}%", strategy.max_total_exposure * Decimal::from(100));
            println!("  Target volatility:    {}%/bar", strategy.target_vol_pct);
            println!("  Min trade:            ${}", strategy.min_trade_quote);

            println!("\nExits:");
            println!(
                "  Stop:                 {}x entry ATR%, capped {}%",
                strategy.stop_atr_mult, strategy.stop_cap_pct
            );
            for (threshold, portion) in &strategy.profit_ladder {
                println!(
                    "  Ladder rung:          +{}% sells {}% of remaining",
                    threshold,
                    portion * 100.0
                );
            }
            println!(
                "  Trailing:             arms at +{}%, {}x ATR% capped {}%",
                strategy.trail_arm_pnl, strategy.trail_atr_mult, strategy.trail_cap_pct
            );
            println!("  Take profit:          +{}%", strategy.take_profit_pct);
            println!(
                "  Stale cut:            {}h at or below {}%",
                strategy.stale_hours, strategy.stale_pnl_floor
            );

            println!("\nRotation:");
            println!("  Cooldown:             {}h", strategy.rotation_cooldown_hours);
            println!("  Min improvement:      {} points", strategy.rotation_min_improvement);
            println!("  Winner protection:    +{}%", strategy.rotation_protect_pnl);

            println!("\n=== Risk Configuration ===\n");
            println!("  Max drawdown:         {}%", risk.max_drawdown_pct);
            println!("  Daily loss limit:     {}%", risk.daily_loss_limit_pct);
            println!("  Max positions:        {}", bot.max_positions);
            println!("  Basket:               {}", bot.symbols.join(", "));
        }
    }

    Ok(())
}
