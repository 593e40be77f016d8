//! Bot runner: the decision cycle orchestrator.
//!
//! Each cycle, in order:
//! - refresh market data and the regime read
//! - snapshot equity and let the risk governor rule on the cycle
//! - evaluate exits for every open position (always, even under a halt)
//! - consider rotation, then at most one new entry (both vetoed by a halt)
//! - persist positions, equity and the action log for crash recovery

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::exchange::types::SymbolFilters;
use crate::exchange::{Candle, ExchangeClient};
use crate::indicators::{build_bundle, correlation, detect_regime, MarketSeries};
use crate::models::{
    AccountState, ActionKind, CycleAction, IndicatorBundle, Position, PositionStore, Regime,
};
use crate::risk::{RiskConfig, RiskGovernor, RiskState};
use crate::trading::{
    score_bundle, EntryContext, HeldSnapshot, LifecycleManager, PositionSizer,
    RotationCoordinator, ScoredSignal, StrategyConfig,
};

const KLINES_1H: u32 = 100;
const KLINES_15M: u32 = 50;
const KLINES_4H: u32 = 60;
const CORRELATION_WINDOW: usize = 48;
const EQUITY_HISTORY_LOAD: u32 = 2000;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Instruments scanned for entries
    pub symbols: Vec<String>,

    /// Quote asset all sizing and equity is denominated in
    pub quote_asset: String,

    /// Symbol whose 4h candles drive regime detection
    pub regime_symbol: String,

    /// Seconds between decision cycles
    pub cycle_interval_secs: u64,

    /// Simulate fills instead of sending orders
    pub dry_run: bool,

    /// Starting equity for dry-run simulation
    pub initial_equity: Decimal,

    /// Hard cap on concurrently open positions
    pub max_positions: usize,

    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub database_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
                "BNBUSDT".to_string(),
                "AVAXUSDT".to_string(),
                "LINKUSDT".to_string(),
            ],
            quote_asset: "USDT".to_string(),
            regime_symbol: "BTCUSDT".to_string(),
            cycle_interval_secs: 300,
            dry_run: true,
            initial_equity: dec!(1000),
            max_positions: 4,
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            database_url: "sqlite:momentumbot.db?mode=rwc".to_string(),
        }
    }
}

/// One cycle's refreshed market view.
struct MarketSnapshot {
    bundles: HashMap<String, IndicatorBundle>,
    closes_1h: HashMap<String, Vec<f64>>,
    regime: Regime,
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    db: Database,
    exchange: ExchangeClient,
    sizer: PositionSizer,
    lifecycle: LifecycleManager,
    rotation: RotationCoordinator,
    governor: RiskGovernor,
    positions: PositionStore,
    filters_cache: HashMap<String, SymbolFilters>,

    /// Simulated free quote balance; only meaningful in dry-run mode.
    sim_free_quote: Decimal,

    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub async fn new(config: BotConfig) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
        let exchange = if config.dry_run {
            ExchangeClient::public()?
        } else {
            ExchangeClient::from_env()?
        };

        Ok(Self {
            sizer: PositionSizer::new(config.strategy.clone()),
            lifecycle: LifecycleManager::new(config.strategy.clone()),
            rotation: RotationCoordinator::new(config.strategy.clone()),
            governor: RiskGovernor::new(config.risk.clone()),
            positions: PositionStore::new(),
            filters_cache: HashMap::new(),
            sim_free_quote: config.initial_equity,
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
            db,
            exchange,
        })
    }

    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Restore persisted state after a restart.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing bot...");

        let restored = self.db.load_positions().await?;
        for position in restored {
            info!(
                symbol = %position.symbol,
                quantity = %position.quantity,
                entry = %position.entry_price,
                "Restored open position"
            );
            self.positions.insert(position);
        }

        let history = self.db.load_equity_history(EQUITY_HISTORY_LOAD).await?;
        if !history.is_empty() {
            info!(points = history.len(), "Restored equity history");
            self.governor.restore_history(history);
        }

        info!(
            positions = self.positions.open_count(),
            dry_run = self.config.dry_run,
            "Bot initialized"
        );
        Ok(())
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            symbols = self.config.symbols.len(),
            interval = self.config.cycle_interval_secs,
            dry_run = self.config.dry_run,
            "Starting decision cycle loop"
        );

        let mut cycle = interval(Duration::from_secs(self.config.cycle_interval_secs));

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            cycle.tick().await;

            if let Err(e) = self.tick().await {
                error!(error = %e, "Cycle failed; will retry next interval");
            }
        }

        info!("Bot shutdown complete");
        Ok(())
    }

    /// One decision cycle.
    async fn tick(&mut self) -> Result<()> {
        debug!("Decision cycle start");
        let now = Utc::now();

        let snapshot = self.collect_market_data().await?;
        let account = self.build_account_state(&snapshot).await?;

        self.governor.record_snapshot(now, account.total_equity);
        self.db.record_equity(now, account.total_equity).await?;
        let risk = self.governor.assess(account.total_equity);

        info!(
            equity = %account.total_equity,
            exposure = %account.exposure_ratio,
            regime = %snapshot.regime,
            risk = %risk.level,
            drawdown = format!("{:.2}%", risk.drawdown_pct),
            "Cycle state"
        );

        if let Some(reason) = &risk.halt {
            warn!(reason = %reason, "Risk halt: entries and rotation suspended");
            self.log(ActionKind::RiskHalt, None, reason.clone()).await;
        }

        // Exits run unconditionally, halted or not
        let mut acted = self.process_exits(&snapshot).await?;

        if !risk.halted() {
            acted |= self.consider_entry_or_rotation(&snapshot, &risk).await?;
        }

        if !acted && risk.halt.is_none() {
            self.log(ActionKind::Hold, None, "no qualifying signal this cycle")
                .await;
        }

        debug!("Decision cycle end");
        Ok(())
    }

    /// Fetch candles and build bundles for the scan set plus anything held.
    async fn collect_market_data(&mut self) -> Result<MarketSnapshot> {
        let mut symbols: Vec<String> = self.config.symbols.clone();
        for held in self.positions.open_symbols() {
            if !symbols.contains(&held) {
                symbols.push(held);
            }
        }

        let mut bundles = HashMap::new();
        let mut closes_1h = HashMap::new();

        for symbol in &symbols {
            match self.fetch_series(symbol).await {
                Ok(series) => {
                    closes_1h.insert(
                        symbol.clone(),
                        series.candles_1h.iter().map(|c| c.close).collect(),
                    );
                    match build_bundle(symbol, &series, &self.config.strategy) {
                        Some(bundle) => {
                            bundles.insert(symbol.clone(), bundle);
                        }
                        None => {
                            debug!(symbol = %symbol, "Not enough history to score");
                        }
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Market data fetch failed");
                }
            }
        }

        let regime_candles: Vec<Candle> = self
            .exchange
            .get_klines(&self.config.regime_symbol, "4h", KLINES_4H)
            .await
            .context("Regime candle fetch failed")?;
        let regime = detect_regime(&regime_candles, &self.config.strategy);

        Ok(MarketSnapshot {
            bundles,
            closes_1h,
            regime,
        })
    }

    async fn fetch_series(&self, symbol: &str) -> Result<MarketSeries> {
        let candles_1h = self.exchange.get_klines(symbol, "1h", KLINES_1H).await?;
        let candles_15m = self.exchange.get_klines(symbol, "15m", KLINES_15M).await?;
        let candles_4h = self.exchange.get_klines(symbol, "4h", KLINES_4H).await?;
        Ok(MarketSeries {
            candles_1h,
            candles_15m,
            candles_4h,
        })
    }

    /// Value the account in quote terms from this cycle's prices.
    async fn build_account_state(&self, snapshot: &MarketSnapshot) -> Result<AccountState> {
        let mut position_values = HashMap::new();
        for position in self.positions.iter_open() {
            let price = match snapshot.bundles.get(&position.symbol) {
                Some(bundle) => Decimal::try_from(bundle.price).unwrap_or(Decimal::ZERO),
                None => self.exchange.get_price(&position.symbol).await?,
            };
            position_values.insert(position.symbol.clone(), position.market_value(price));
        }

        let free_quote = if self.config.dry_run {
            self.sim_free_quote
        } else {
            self.exchange
                .get_balances()
                .await?
                .into_iter()
                .find(|b| b.asset == self.config.quote_asset)
                .map(|b| b.free)
                .unwrap_or(Decimal::ZERO)
        };

        Ok(AccountState::new(free_quote, position_values))
    }

    /// Walk every open position through the exit chain.
    async fn process_exits(&mut self, snapshot: &MarketSnapshot) -> Result<bool> {
        let now = Utc::now();
        let mut acted = false;

        for symbol in self.positions.open_symbols() {
            let Some(bundle) = snapshot.bundles.get(&symbol) else {
                debug!(symbol = %symbol, "No bundle for held position; keeping");
                continue;
            };

            let decision = {
                let Some(position) = self.positions.get_mut(&symbol) else {
                    continue;
                };
                let decision =
                    self.lifecycle
                        .evaluate_exit(position, bundle, snapshot.regime, now);
                // High-water mark may have moved even without an exit
                self.db.save_position(position).await?;
                decision
            };

            if let Some(exit) = decision {
                info!(
                    symbol = %symbol,
                    reason = %exit.reason,
                    portion = exit.portion,
                    "Exit signal"
                );
                self.execute_sell(&symbol, exit.portion, &exit.reason, None, bundle.price)
                    .await?;
                acted = true;
            }
        }

        Ok(acted)
    }

    /// Rotation first, then at most one new entry per cycle.
    ///
    /// Every ranked candidate goes through the entry gates; a gate failure on
    /// the top signal does not stop a weaker qualifier from trading.
    async fn consider_entry_or_rotation(
        &mut self,
        snapshot: &MarketSnapshot,
        risk: &RiskState,
    ) -> Result<bool> {
        let account = self.build_account_state(snapshot).await?;
        let held: HashSet<String> = self.positions.open_symbols().into_iter().collect();

        let mut candidates: Vec<ScoredSignal> = snapshot
            .bundles
            .values()
            .filter(|b| !held.contains(&b.symbol))
            .map(|b| score_bundle(b, &self.config.strategy))
            .collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let ranked: Vec<(&ScoredSignal, &IndicatorBundle, EntryContext)> = candidates
            .iter()
            .filter_map(|signal| {
                let bundle = snapshot.bundles.get(&signal.symbol)?;
                let ctx = EntryContext {
                    halted: risk.halted(),
                    regime: snapshot.regime,
                    max_open_correlation: self
                        .max_open_correlation(&signal.symbol, &snapshot.closes_1h),
                };
                Some((signal, bundle, ctx))
            })
            .collect();
        let qualified = gate_candidates(&self.lifecycle, ranked);

        let Some(&(best, best_bundle)) = qualified.first() else {
            return Ok(false);
        };

        // Rotation runs before new entries: a weak holding may make room
        // for the strongest qualifier
        if self.try_rotation(snapshot, best, best_bundle).await? {
            return Ok(true);
        }

        if self.positions.open_count() >= self.config.max_positions {
            return Ok(false);
        }

        for (signal, bundle) in qualified {
            let size = self.sizer.entry_quote(
                signal,
                bundle,
                &account,
                snapshot.regime,
                risk.level.multiplier(),
            );
            if size > Decimal::ZERO {
                info!(symbol = %signal.symbol, score = signal.score, quote = %size, "Opening position");
                self.execute_buy(&signal.symbol, size, bundle, signal.rationale())
                    .await?;
                return Ok(true);
            }
            debug!(symbol = %signal.symbol, "Entry could not be funded");
        }

        Ok(false)
    }

    async fn try_rotation(
        &mut self,
        snapshot: &MarketSnapshot,
        candidate: &ScoredSignal,
        candidate_bundle: &IndicatorBundle,
    ) -> Result<bool> {
        let now = Utc::now();

        let held: Vec<HeldSnapshot> = self
            .positions
            .iter_open()
            .filter_map(|p| {
                let bundle = snapshot.bundles.get(&p.symbol)?;
                let price = Decimal::try_from(bundle.price).ok()?;
                Some(HeldSnapshot {
                    symbol: p.symbol.clone(),
                    score: score_bundle(bundle, &self.config.strategy).score,
                    pnl_pct: p.pnl_pct(price),
                })
            })
            .collect();

        let Some(plan) =
            self.rotation
                .plan(&held, Some((candidate.symbol.as_str(), candidate.score)), now)
        else {
            return Ok(false);
        };

        info!(
            sell = %plan.sell_symbol,
            buy = %plan.buy_symbol,
            "Rotation planned"
        );

        let Some(sell_bundle) = snapshot.bundles.get(&plan.sell_symbol) else {
            return Ok(false);
        };
        let freed = self
            .execute_sell(
                &plan.sell_symbol,
                1.0,
                &plan.rationale(),
                Some(ActionKind::Rotate),
                sell_bundle.price,
            )
            .await?;

        // Sell-then-buy: no replacement entry if the sell freed nothing
        if freed.is_zero() {
            warn!(symbol = %plan.sell_symbol, "Rotation sell freed no value; buy skipped");
            return Ok(true);
        }

        let reinvest = freed * self.config.strategy.rotation_reinvest;
        if reinvest < self.config.strategy.min_trade_quote {
            self.log(
                ActionKind::Dust,
                Some(plan.buy_symbol.clone()),
                format!("rotation proceeds {reinvest:.2} below minimum"),
            )
            .await;
            return Ok(true);
        }

        self.execute_buy(
            &plan.buy_symbol,
            reinvest,
            candidate_bundle,
            plan.rationale(),
        )
        .await?;
        self.rotation.mark_rotated(now);
        Ok(true)
    }

    /// Buy `quote` worth and open the lifecycle record.
    async fn execute_buy(
        &mut self,
        symbol: &str,
        quote: Decimal,
        bundle: &IndicatorBundle,
        rationale: String,
    ) -> Result<()> {
        let (quantity, entry_price, spent) = if self.config.dry_run {
            let price = Decimal::try_from(bundle.price).unwrap_or(Decimal::ONE);
            info!(symbol = %symbol, quote = %quote, price = %price, "[DRY RUN] Market buy");
            (quote / price, price, quote)
        } else {
            let response = self.exchange.market_buy_quote(symbol, quote).await?;
            let entry = response
                .avg_price()
                .context("Buy filled with zero quantity")?;
            info!(
                symbol = %symbol,
                order_id = response.order_id,
                qty = %response.executed_qty,
                avg_price = %entry,
                "Market buy filled"
            );
            (response.executed_qty, entry, response.cumulative_quote_qty)
        };

        if self.config.dry_run {
            self.sim_free_quote -= spent;
        }

        let position = Position::new(
            symbol.to_string(),
            quantity,
            entry_price,
            bundle.atr_pct,
            Utc::now(),
        );
        self.db.save_position(&position).await?;
        self.positions.insert(position);
        self.log(ActionKind::Open, Some(symbol.to_string()), rationale)
            .await;

        Ok(())
    }

    /// Sell a portion of a position; returns the quote value freed.
    ///
    /// `kind_override` lets rotation label its sell as ROTATE instead of
    /// SCALE_OUT/CLOSE. Unsellable full exits are classified as DUST and the
    /// record is dropped from tracking.
    async fn execute_sell(
        &mut self,
        symbol: &str,
        portion: f64,
        reason: &str,
        kind_override: Option<ActionKind>,
        mark_price: f64,
    ) -> Result<Decimal> {
        let Some(position) = self.positions.get(symbol) else {
            return Ok(Decimal::ZERO);
        };
        let full_exit = portion >= 1.0;
        let quantity = if full_exit {
            position.quantity
        } else {
            position.quantity * Decimal::try_from(portion).unwrap_or(Decimal::ZERO)
        };
        let price = Decimal::try_from(mark_price).unwrap_or(Decimal::ZERO);

        let filters = self.filters_for(symbol).await?;
        if !filters.is_sellable(quantity, price) {
            if full_exit {
                warn!(symbol = %symbol, qty = %quantity, "Position is unsellable dust; dropping");
                self.positions.close(symbol);
                self.db.delete_position(symbol).await?;
                self.log(
                    ActionKind::Dust,
                    Some(symbol.to_string()),
                    format!("{reason}; below exchange minimum"),
                )
                .await;
            } else {
                debug!(symbol = %symbol, qty = %quantity, "Partial exit below minimum; skipped");
            }
            return Ok(Decimal::ZERO);
        }

        let (sold, proceeds) = if self.config.dry_run {
            let qty = filters.round_qty(quantity);
            info!(symbol = %symbol, qty = %qty, price = %price, "[DRY RUN] Market sell");
            (qty, qty * price)
        } else {
            let response = self.exchange.market_sell(symbol, quantity, &filters).await?;
            info!(
                symbol = %symbol,
                order_id = response.order_id,
                qty = %response.executed_qty,
                proceeds = %response.cumulative_quote_qty,
                "Market sell filled"
            );
            (response.executed_qty, response.cumulative_quote_qty)
        };

        if self.config.dry_run {
            self.sim_free_quote += proceeds;
        }

        let kind = if full_exit {
            if let Some(position) = self.positions.close(symbol) {
                let pnl = position.pnl_pct(price);
                info!(symbol = %symbol, pnl = format!("{pnl:+.2}%"), "Position closed");
            }
            self.db.delete_position(symbol).await?;
            kind_override.unwrap_or(ActionKind::Close)
        } else {
            if let Some(position) = self.positions.get_mut(symbol) {
                position.reduce(sold);
                self.db.save_position(position).await?;
            }
            kind_override.unwrap_or(ActionKind::ScaleOut)
        };

        self.log(kind, Some(symbol.to_string()), reason.to_string())
            .await;
        Ok(proceeds)
    }

    async fn filters_for(&mut self, symbol: &str) -> Result<SymbolFilters> {
        if self.config.dry_run {
            // Simulated fills only honor the strategy's own dust floor
            return Ok(SymbolFilters {
                step_size: Decimal::ZERO,
                min_qty: Decimal::ZERO,
                min_notional: self.config.strategy.min_trade_quote,
            });
        }
        if let Some(filters) = self.filters_cache.get(symbol) {
            return Ok(filters.clone());
        }
        let filters = self.exchange.get_symbol_filters(symbol).await?;
        self.filters_cache.insert(symbol.to_string(), filters.clone());
        Ok(filters)
    }

    /// Highest 1h-return correlation between a candidate and any open position.
    fn max_open_correlation(
        &self,
        candidate: &str,
        closes_1h: &HashMap<String, Vec<f64>>,
    ) -> Option<(String, f64)> {
        let candidate_returns = returns_window(closes_1h.get(candidate)?);

        self.positions
            .iter_open()
            .filter_map(|p| {
                let held_returns = returns_window(closes_1h.get(&p.symbol)?);
                Some((
                    p.symbol.clone(),
                    correlation(&candidate_returns, &held_returns),
                ))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    async fn log(&self, kind: ActionKind, symbol: Option<String>, rationale: impl Into<String>) {
        let action = CycleAction::new(kind, symbol, rationale);
        if let Err(e) = self.db.log_action(&action).await {
            warn!(error = %e, "Failed to persist action");
        }
    }
}

/// Filter ranked candidates through the entry gates, keeping rank order.
fn gate_candidates<'a>(
    lifecycle: &LifecycleManager,
    ranked: Vec<(&'a ScoredSignal, &'a IndicatorBundle, EntryContext)>,
) -> Vec<(&'a ScoredSignal, &'a IndicatorBundle)> {
    ranked
        .into_iter()
        .filter_map(|(signal, bundle, ctx)| {
            match lifecycle.validate_entry(signal, bundle, &ctx) {
                Ok(()) => Some((signal, bundle)),
                Err(reason) => {
                    debug!(symbol = %signal.symbol, score = signal.score, reason = %reason, "Entry rejected");
                    None
                }
            }
        })
        .collect()
}

/// Trailing one-bar returns over the correlation window.
fn returns_window(closes: &[f64]) -> Vec<f64> {
    let start = closes.len().saturating_sub(CORRELATION_WINDOW + 1);
    closes[start..]
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// One-shot market scan: score every symbol and print a ranked table.
pub async fn scan(symbols: &[String], cfg: &StrategyConfig) -> Result<()> {
    let exchange = ExchangeClient::public()?;

    let regime_candles = exchange.get_klines("BTCUSDT", "4h", KLINES_4H).await?;
    let regime = detect_regime(&regime_candles, cfg);
    println!("Market regime: {regime}\n");

    let mut rows = Vec::new();
    for symbol in symbols {
        let candles_1h = exchange.get_klines(symbol, "1h", KLINES_1H).await?;
        let candles_15m = exchange.get_klines(symbol, "15m", KLINES_15M).await?;
        let candles_4h = exchange.get_klines(symbol, "4h", KLINES_4H).await?;
        let series = MarketSeries {
            candles_1h,
            candles_15m,
            candles_4h,
        };

        match build_bundle(symbol, &series, cfg) {
            Some(bundle) => {
                let signal = score_bundle(&bundle, cfg);
                rows.push((signal.score, bundle, signal));
            }
            None => println!("{symbol:<10} insufficient history"),
        }
    }
    rows.sort_by(|a, b| b.0.total_cmp(&a.0));

    println!(
        "{:<10} {:>8} {:>8} {:>7} {:>7}  {}",
        "SYMBOL", "SCORE", "MOM%", "RSI", "ATR%", "RATIONALE"
    );
    for (score, bundle, signal) in rows {
        println!(
            "{:<10} {:>8.1} {:>8.2} {:>7.1} {:>7.2}  {}",
            bundle.symbol,
            score,
            bundle.momentum_score,
            bundle.rsi_1h,
            bundle.atr_pct,
            signal.rationale()
        );
    }

    Ok(())
}

/// Print recent activity and open positions from the database.
pub async fn status(database_url: &str) -> Result<()> {
    let db = Database::new(database_url).await?;

    let positions = db.load_positions().await?;
    println!("=== Open Positions ===");
    if positions.is_empty() {
        println!("(none)");
    }
    for p in &positions {
        println!(
            "{:<10} qty {} @ {} since {} (rungs fired: {})",
            p.symbol,
            p.quantity,
            p.entry_price,
            p.opened_at.format("%Y-%m-%d %H:%M"),
            p.triggered_levels.len()
        );
    }

    let equity = db.load_equity_history(1).await?;
    if let Some((ts, value)) = equity.last() {
        println!("\nEquity: {} (as of {})", value, ts.format("%Y-%m-%d %H:%M"));
    }

    println!("\n=== Recent Actions ===");
    for (timestamp, what, rationale) in db.recent_actions(20).await? {
        println!("{timestamp}  {what:<18} {rationale}");
    }

    Ok(())
}
