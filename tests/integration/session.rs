//! End-to-end session scenarios against scripted and simulated casinos.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use wager_wizard::engine::{EngineSettings, SessionController};
use wager_wizard::platforms::simulated::SimulatedCasino;
use wager_wizard::types::*;

use crate::mock_casino::{ScriptedCasino, Step};

fn config(loss_increase: Decimal) -> SessionConfig {
    SessionConfig {
        base_stake: dec!(1.00),
        currency: "usdc".into(),
        game: Game::Limbo,
        target_multiplier: dec!(2.00),
        loss_increase_fraction: loss_increase,
        stop_on_win: false,
    }
}

fn settings(delay: Duration) -> EngineSettings {
    EngineSettings {
        inter_round_delay: delay,
        balance_refresh_every: 5,
    }
}

fn controller(casino: &Arc<ScriptedCasino>, delay: Duration) -> SessionController {
    SessionController::new(casino.clone(), settings(delay))
}

/// Everything published so far, oldest first.
fn drain_events(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

fn stop_reasons(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<StopReason> {
    drain_events(events)
        .into_iter()
        .filter_map(|kind| match kind {
            EventKind::Stopped { reason } => Some(reason),
            _ => None,
        })
        .collect()
}

/// `(amount, message, fatal)` of every failed round.
fn round_failures(kinds: &[EventKind]) -> Vec<(Decimal, String, bool)> {
    kinds
        .iter()
        .filter_map(|kind| match kind {
            EventKind::RoundFailed {
                amount,
                message,
                fatal,
            } => Some((*amount, message.clone(), *fatal)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_martingale_progression_and_profit() {
    let casino = Arc::new(ScriptedCasino::new([
        Step::Loss,
        Step::Loss,
        Step::Win,
        Step::Loss,
    ]));
    let ctl = controller(&casino, Duration::ZERO);
    let mut events = ctl.subscribe();

    ctl.start(config(dec!(0.5))).await.unwrap();
    ctl.wait_until_idle().await;

    // The fifth dispatch hits the exhausted script and ends the session.
    assert_eq!(
        casino.dispatched(),
        vec![dec!(1.00), dec!(1.50), dec!(2.25), dec!(1.00), dec!(1.50)]
    );

    let view = ctl.snapshot();
    assert_eq!(view.stats.round_count, 4);
    assert_eq!(view.stats.wins, 1);
    assert_eq!(view.stats.losses, 3);
    assert_eq!(view.stats.net_profit, dec!(-1.25));
    assert_eq!(view.stats.wagered, dec!(5.75));
    assert_eq!(view.stats.longest_losing_streak, 2);
    assert_eq!(view.current_bet, dec!(1.50));
    assert_eq!(view.consecutive_losses, 1);

    let amounts: Vec<Decimal> = view.stats.history.iter().map(|r| r.amount).collect();
    assert_eq!(amounts, vec![dec!(1.00), dec!(2.25), dec!(1.50), dec!(1.00)]);

    assert_eq!(stop_reasons(&mut events), vec![StopReason::InsufficientBalance]);
}

#[tokio::test]
async fn test_stop_on_win_dispatches_nothing_after_win() {
    let casino = Arc::new(ScriptedCasino::new([Step::Loss, Step::Win, Step::Loss]));
    let ctl = controller(&casino, Duration::ZERO);
    let mut events = ctl.subscribe();

    let config = SessionConfig {
        stop_on_win: true,
        ..config(dec!(0.5))
    };
    ctl.start(config).await.unwrap();
    ctl.wait_until_idle().await;

    assert_eq!(casino.dispatched(), vec![dec!(1.00), dec!(1.50)]);
    assert_eq!(ctl.snapshot().current_bet, dec!(1.00));
    assert_eq!(stop_reasons(&mut events), vec![StopReason::StopOnWin]);
}

#[tokio::test]
async fn test_history_keeps_latest_hundred() {
    let casino = Arc::new(ScriptedCasino::new(std::iter::repeat(Step::Loss).take(105)));
    let ctl = controller(&casino, Duration::ZERO);

    ctl.start(config(Decimal::ZERO)).await.unwrap();
    ctl.wait_until_idle().await;

    let view = ctl.snapshot();
    assert_eq!(view.stats.round_count, 105);
    assert_eq!(view.stats.history.len(), 100);
    assert_eq!(view.stats.history[0].id, "bet-105");
    assert_eq!(view.stats.history[99].id, "bet-6");
    assert_eq!(view.stats.net_profit, dec!(-105));
    // Flat staking never moves the stake.
    assert!(casino.dispatched().iter().all(|a| *a == dec!(1.00)));
}

#[tokio::test]
async fn test_preflight_stops_before_unaffordable_stake() {
    let casino = Arc::new(
        ScriptedCasino::new(std::iter::repeat(Step::Loss).take(10)).with_balance(dec!(4.00)),
    );
    let ctl = controller(&casino, Duration::ZERO);
    let mut events = ctl.subscribe();

    ctl.start(config(dec!(0.5))).await.unwrap();
    ctl.wait_until_idle().await;

    // 1.00 and 1.50 leave 1.50; the 2.25 stake is never sent.
    assert_eq!(casino.dispatched(), vec![dec!(1.00), dec!(1.50)]);
    assert_eq!(casino.balance(), Some(dec!(1.50)));

    let view = ctl.snapshot();
    assert_eq!(view.balance, Some(dec!(1.50)));
    assert_eq!(view.current_bet, dec!(2.25));

    let kinds = drain_events(&mut events);
    assert_eq!(
        round_failures(&kinds),
        vec![(
            dec!(2.25),
            "Insufficient balance: need $2.25, have $1.50".to_string(),
            true
        )]
    );
    assert_eq!(
        kinds.last(),
        Some(&EventKind::Stopped {
            reason: StopReason::InsufficientBalance
        })
    );
}

#[tokio::test]
async fn test_transient_failure_retries_same_amount() {
    let casino = Arc::new(ScriptedCasino::new([
        Step::Loss,
        Step::Fail(WagerError::Transport("502 Bad Gateway".into())),
        Step::Fail(WagerError::Rejected("Rate limited".into())),
        Step::Win,
    ]));
    let ctl = controller(&casino, Duration::ZERO);
    let mut events = ctl.subscribe();

    ctl.start(config(dec!(0.5))).await.unwrap();
    ctl.wait_until_idle().await;

    assert_eq!(
        casino.dispatched(),
        vec![dec!(1.00), dec!(1.50), dec!(1.50), dec!(1.50), dec!(1.00)]
    );
    let view = ctl.snapshot();
    assert_eq!(view.stats.round_count, 2);
    assert_eq!(view.stats.net_profit, dec!(0.50));

    let failures = round_failures(&drain_events(&mut events));
    let (transient, fatal): (Vec<_>, Vec<_>) = failures.into_iter().partition(|f| !f.2);
    assert_eq!(transient.len(), 2);
    assert!(transient.iter().all(|(amount, _, _)| *amount == dec!(1.50)));
    assert!(transient[1].1.contains("Rate limited"));

    // The exhausted script ends the run with a funds rejection.
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].0, dec!(1.00));
    assert!(fatal[0].1.contains("Insufficient funds"));
}

#[tokio::test]
async fn test_stop_lets_in_flight_round_settle() {
    let casino = Arc::new(
        ScriptedCasino::new(std::iter::repeat(Step::Loss).take(10))
            .with_latency(Duration::from_millis(100)),
    );
    let ctl = controller(&casino, Duration::from_millis(1));
    let mut events = ctl.subscribe();

    ctl.start(config(dec!(0.5))).await.unwrap();
    casino.wait_for_dispatch(1).await;

    ctl.stop();
    assert_eq!(ctl.run_state(), RunState::Stopping);

    ctl.wait_until_idle().await;

    assert_eq!(casino.dispatched().len(), 1);
    let view = ctl.snapshot();
    assert_eq!(view.run_state, RunState::Idle);
    assert_eq!(view.stats.round_count, 1);
    assert_eq!(view.current_bet, dec!(1.50));
    assert_eq!(stop_reasons(&mut events), vec![StopReason::UserRequest]);
}

#[tokio::test]
async fn test_rounds_never_overlap_across_restarts() {
    let casino = Arc::new(
        ScriptedCasino::new(std::iter::repeat(Step::Loss).take(1000))
            .with_latency(Duration::from_millis(5)),
    );
    let ctl = controller(&casino, Duration::from_millis(1));

    for i in 1..=5 {
        ctl.start(config(Decimal::ZERO)).await.unwrap();
        casino.wait_for_dispatch(i * 2).await;
        ctl.stop();
        // Restart immediately; the previous round may still be in flight.
    }
    ctl.start(config(Decimal::ZERO)).await.unwrap();
    casino.wait_for_dispatch(12).await;
    ctl.stop();
    ctl.wait_until_idle().await;

    assert_eq!(casino.max_in_flight(), 1);
    let view = ctl.snapshot();
    assert_eq!(view.stats.round_count as usize, casino.dispatched().len());
}

#[tokio::test]
async fn test_reset_requires_stop() {
    let casino = Arc::new(ScriptedCasino::new(std::iter::repeat(Step::Loss).take(10)));
    let ctl = controller(&casino, Duration::from_secs(60));

    ctl.start(config(dec!(0.5))).await.unwrap();
    casino.wait_for_dispatch(1).await;

    let err = ctl.reset().await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot reset while session is running");

    ctl.stop();
    ctl.wait_until_idle().await;
    ctl.reset().await.unwrap();

    let view = ctl.snapshot();
    assert_eq!(view, SessionView::default());
    assert_eq!(view.stats.round_count, 0);
}

#[tokio::test]
async fn test_simulated_casino_ledger_matches_profit() {
    let casino = Arc::new(SimulatedCasino::with_seed("usdc", dec!(100), 2024));
    let ctl = SessionController::new(casino.clone(), settings(Duration::ZERO));

    let mut view = ctl.view();
    ctl.start(SessionConfig {
        base_stake: dec!(0.10),
        ..config(dec!(0.1))
    })
    .await
    .unwrap();
    view.wait_for(|v| v.stats.round_count >= 25 || v.run_state == RunState::Idle)
        .await
        .unwrap();
    ctl.stop();
    ctl.wait_until_idle().await;

    let view = ctl.snapshot();
    assert!(view.stats.round_count > 0);
    assert_eq!(casino.balance().await, dec!(100) + view.stats.net_profit);
    assert_eq!(casino.bets_placed().await, view.stats.round_count);
}

#[tokio::test]
async fn test_stop_during_balance_refresh_places_no_wager() {
    let casino = Arc::new(
        ScriptedCasino::new(std::iter::repeat(Step::Loss).take(10))
            .with_balance(dec!(100))
            .with_balance_latency(Duration::from_millis(300)),
    );
    let ctl = controller(&casino, Duration::ZERO);
    let mut events = ctl.subscribe();

    ctl.start(config(dec!(0.5))).await.unwrap();
    // The worker is now inside the start-of-run balance fetch.
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctl.stop();
    ctl.wait_until_idle().await;

    assert!(casino.dispatched().is_empty());
    assert_eq!(casino.balance_fetches(), 1);

    let view = ctl.snapshot();
    assert_eq!(view.stats.round_count, 0);
    assert_eq!(view.balance, Some(dec!(100)));
    assert_eq!(stop_reasons(&mut events), vec![StopReason::UserRequest]);
}

#[tokio::test]
async fn test_funds_rejection_refreshes_balance_before_stopping() {
    let casino = Arc::new(ScriptedCasino::new([Step::Loss]).with_balance(dec!(100)));
    let ctl = controller(&casino, Duration::ZERO);
    let mut events = ctl.subscribe();

    ctl.start(config(dec!(0.5))).await.unwrap();
    ctl.wait_until_idle().await;

    // Start of run, after the settled loss, then after the rejection.
    // The cadence refresh before the second round is skipped as fresh.
    assert_eq!(casino.balance_fetches(), 3);
    assert_eq!(casino.dispatched(), vec![dec!(1.00), dec!(1.50)]);

    let kinds = drain_events(&mut events);
    let balances: Vec<Decimal> = kinds
        .iter()
        .filter_map(|kind| match kind {
            EventKind::BalanceUpdated { balance } => Some(*balance),
            _ => None,
        })
        .collect();
    assert_eq!(balances, vec![dec!(100), dec!(99), dec!(99)]);

    let tail = &kinds[kinds.len() - 3..];
    assert!(matches!(
        &tail[0],
        EventKind::RoundFailed { amount, message, fatal: true }
            if *amount == dec!(1.50) && message.contains("Insufficient funds")
    ));
    assert_eq!(tail[1], EventKind::BalanceUpdated { balance: dec!(99) });
    assert_eq!(
        tail[2],
        EventKind::Stopped {
            reason: StopReason::InsufficientBalance
        }
    );
    assert_eq!(ctl.snapshot().balance, Some(dec!(99)));
}

#[tokio::test]
async fn test_balance_outage_reported_while_betting_continues() {
    let casino = Arc::new(ScriptedCasino::new([Step::Loss, Step::Loss, Step::Win]));
    let ctl = controller(&casino, Duration::ZERO);
    let mut events = ctl.subscribe();

    ctl.start(config(dec!(0.5))).await.unwrap();
    ctl.wait_until_idle().await;

    let view = ctl.snapshot();
    assert_eq!(view.stats.round_count, 3);
    assert_eq!(view.balance, None);

    let kinds = drain_events(&mut events);
    let outages: Vec<&String> = kinds
        .iter()
        .filter_map(|kind| match kind {
            EventKind::BalanceRefreshFailed { message } => Some(message),
            _ => None,
        })
        .collect();
    // One per fetch: start of run, three settlements, the funds rejection.
    assert_eq!(outages.len(), 5);
    assert_eq!(casino.balance_fetches(), 5);
    assert!(outages.iter().all(|m| m.contains("balance endpoint down")));

    // The first fetch fails before any wager, and rounds still settle.
    assert!(matches!(kinds[1], EventKind::BalanceRefreshFailed { .. }));
    assert!(matches!(kinds[2], EventKind::RoundSettled { .. }));
    assert!(!kinds.iter().any(|k| matches!(k, EventKind::BalanceUpdated { .. })));
}

#[tokio::test]
async fn test_huge_loss_increase_saturates_stake() {
    let casino = Arc::new(ScriptedCasino::new([Step::Loss]));
    let ctl = controller(&casino, Duration::ZERO);
    let mut events = ctl.subscribe();

    ctl.start(config(Decimal::MAX)).await.unwrap();
    ctl.wait_until_idle().await;

    assert_eq!(casino.dispatched(), vec![dec!(1.00), Decimal::MAX]);
    let view = ctl.snapshot();
    assert_eq!(view.stats.round_count, 1);
    assert_eq!(view.current_bet, Decimal::MAX);
    assert_eq!(stop_reasons(&mut events), vec![StopReason::InsufficientBalance]);
}

#[tokio::test]
async fn test_stop_while_restart_waits_for_previous_round() {
    let casino = Arc::new(
        ScriptedCasino::new(std::iter::repeat(Step::Loss).take(10))
            .with_latency(Duration::from_millis(100)),
    );
    let ctl = Arc::new(controller(&casino, Duration::from_millis(1)));
    let mut events = ctl.subscribe();

    ctl.start(config(dec!(0.5))).await.unwrap();
    casino.wait_for_dispatch(1).await;
    ctl.stop();

    let restart = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.start(config(dec!(0.5))).await }
    });
    // The restart is now waiting on the in-flight round.
    tokio::time::sleep(Duration::from_millis(20)).await;
    ctl.stop();

    restart.await.unwrap().unwrap();
    ctl.wait_until_idle().await;

    assert_eq!(casino.dispatched().len(), 1);
    let view = ctl.snapshot();
    assert_eq!(view.run_state, RunState::Idle);
    assert_eq!(view.stats.round_count, 1);
    assert_eq!(
        stop_reasons(&mut events),
        vec![StopReason::UserRequest, StopReason::UserRequest]
    );
}
