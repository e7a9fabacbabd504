//! End-to-end runs over scripted collaborators.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use serde_json::json;
use tempfile::TempDir;

use common::{FakeExchange, ScriptedLlm};
use deskagents::config::AppConfig;
use deskagents::decision::{RecordSource, Verdict};
use deskagents::domain::{OrderKind, PositionSide};
use deskagents::error::DeskError;
use deskagents::llm::{ChatMessage, LlmResponse, Role, ToolCall};
use deskagents::observer::{ChannelObserver, RunEvent};
use deskagents::pipeline::PipelineOrchestrator;

const BULL: &str = "You are the Bull researcher";
const BEAR: &str = "You are the Bear researcher";
const RISKY: &str = "You are the Risky risk analyst";
const SAFE: &str = "You are the Safe risk analyst";
const NEUTRAL: &str = "You are the Neutral risk analyst";

fn trade_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn config(results: &TempDir, analysts: &[&str], rounds: u32) -> AppConfig {
    let mut cfg = AppConfig::default_config("BTC/USDT");
    cfg.pipeline.selected_analysts = analysts.iter().map(|a| a.to_string()).collect();
    cfg.pipeline.max_debate_rounds = rounds;
    cfg.pipeline.max_risk_rounds = rounds;
    cfg.retry.base_delay_ms = 10;
    cfg.audit.results_dir = results.path().to_string_lossy().into_owned();
    cfg
}

fn first(messages: &[ChatMessage]) -> &str {
    messages.first().map(|m| m.content.as_str()).unwrap_or_default()
}

fn tool_request(id: &str, name: &str) -> LlmResponse {
    LlmResponse {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: json!({"interval": "1h", "limit": 24}),
        }],
    }
}

fn candle_request(id: &str) -> LlmResponse {
    tool_request(id, "get_crypto_data")
}

/// Analysts call their first offered tool once then report; everyone else
/// answers in prose
fn desk_script(decision: &'static str) -> ScriptedLlm {
    ScriptedLlm::new(move |messages, tools| {
        let prompt = first(messages);
        if prompt.starts_with("You are the risk manager") {
            return Ok(LlmResponse::text(decision));
        }
        if prompt.contains("analyst on a crypto futures desk") {
            let answered = messages.iter().any(|m| m.role == Role::Tool);
            if let (Some(tool), false) = (tools.first(), answered) {
                return Ok(tool_request("call-1", &tool.name));
            }
            return Ok(LlmResponse::text("Trend is up, momentum intact."));
        }
        let head: String = prompt.chars().take(30).collect();
        Ok(LlmResponse::text(format!("turn for: {}", head)))
    })
}

#[tokio::test(start_paused = true)]
async fn analyst_tool_loop_ends_on_plain_answer() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(desk_script("**FINAL DECISION: HOLD**"));
    let exchange = Arc::new(FakeExchange::new());
    let cfg = config(&dir, &["market"], 1);

    let desk = PipelineOrchestrator::from_config(&cfg, llm.clone(), exchange).unwrap();
    let outcome = desk.run(trade_date()).await.unwrap();

    let analyst_calls: Vec<_> = llm
        .calls()
        .into_iter()
        .filter(|(_, m)| first(m).contains("analyst on a crypto futures desk"))
        .collect();
    assert_eq!(analyst_calls.len(), 2);

    // second turn carries the assistant tool request and the tool answer
    let second = &analyst_calls[1].1;
    assert_eq!(second.len(), 4);
    assert_eq!(second[3].role, Role::Tool);
    assert_eq!(second[3].tool_call_id.as_deref(), Some("call-1"));
    assert!(second[3].content.contains("candles"));

    assert_eq!(outcome.state.report("market"), Some("Trend is up, momentum intact."));
    assert!(outcome.state.messages.is_empty());
    assert_eq!(outcome.verdict, Verdict::Hold);
}

#[tokio::test(start_paused = true)]
async fn tool_ceiling_uses_latest_content_as_report() {
    let dir = TempDir::new().unwrap();
    let analyst_turns = Arc::new(AtomicU32::new(0));
    let turns = analyst_turns.clone();
    let llm = Arc::new(ScriptedLlm::new(move |messages, _| {
        let prompt = first(messages);
        if prompt.contains("analyst on a crypto futures desk") {
            let n = turns.fetch_add(1, Ordering::SeqCst);
            let mut reply = candle_request(&format!("call-{}", n));
            reply.content = format!("draft {}", n);
            return Ok(reply);
        }
        Ok(LlmResponse::text("**FINAL DECISION: HOLD**"))
    }));
    let mut cfg = config(&dir, &["market"], 1);
    cfg.pipeline.max_tool_iterations = 3;

    let desk = PipelineOrchestrator::from_config(&cfg, llm, Arc::new(FakeExchange::new())).unwrap();
    let outcome = desk.run(trade_date()).await.unwrap();

    assert_eq!(analyst_turns.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.state.report("market"), Some("draft 2"));
}

#[tokio::test(start_paused = true)]
async fn debate_and_risk_turns_are_bounded() {
    for rounds in [1u32, 2] {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(desk_script("**FINAL DECISION: HOLD**"));
        let cfg = config(&dir, &["sentiment"], rounds);

        let desk = PipelineOrchestrator::from_config(&cfg, llm.clone(), Arc::new(FakeExchange::new())).unwrap();
        let outcome = desk.run(trade_date()).await.unwrap();

        let r = rounds as usize;
        assert_eq!(llm.count_prompts(BULL) + llm.count_prompts(BEAR), 2 * r);
        assert_eq!(llm.count_prompts(BULL), r);
        assert_eq!(
            llm.count_prompts(RISKY) + llm.count_prompts(SAFE) + llm.count_prompts(NEUTRAL),
            3 * r
        );
        assert_eq!(llm.count_prompts("You are the research manager"), 1);
        assert_eq!(llm.count_prompts("You are the risk manager"), 1);
        assert_eq!(outcome.state.debate.round_count, 2 * rounds);
        assert_eq!(outcome.state.risk_debate.round_count, 3 * rounds);
    }
}

#[tokio::test(start_paused = true)]
async fn messages_are_cleared_between_analysts() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(desk_script("**FINAL DECISION: HOLD**"));
    let cfg = config(&dir, &["market", "sentiment"], 1);

    let desk = PipelineOrchestrator::from_config(&cfg, llm.clone(), Arc::new(FakeExchange::new())).unwrap();
    desk.run(trade_date()).await.unwrap();

    let sentiment: Vec<_> = llm
        .calls()
        .into_iter()
        .filter(|(_, m)| first(m).starts_with("You are the sentiment analyst"))
        .collect();
    assert!(!sentiment.is_empty());
    // only its own system + task prompt, none of the market analyst's turns
    assert_eq!(sentiment[0].1.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn fatal_llm_error_aborts_without_trading() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedLlm::new(|messages, _| {
        if first(messages).starts_with(BULL) {
            return Err(DeskError::Auth("invalid api key".into()));
        }
        Ok(LlmResponse::text("fine **FINAL DECISION: BUY**"))
    }));
    let exchange = Arc::new(FakeExchange::new());
    let mut cfg = config(&dir, &["sentiment"], 1);
    cfg.execution.auto_execute = true;
    cfg.execution.test_mode = false;

    let observer = Arc::new(ChannelObserver::new(8));
    let mut events = observer.subscribe();
    let desk = PipelineOrchestrator::from_config(&cfg, llm.clone(), exchange.clone())
        .unwrap()
        .with_observer(observer);

    let err = desk.run(trade_date()).await.unwrap_err();
    assert!(matches!(err, DeskError::Auth(_)));
    // no retries for a fatal error
    assert_eq!(llm.count_prompts(BULL), 1);
    assert_eq!(llm.count_prompts("You are the risk manager"), 0);
    assert!(exchange.mutating_calls().is_empty());

    match events.recv().await.unwrap() {
        RunEvent::Failed { symbol, error, .. } => {
            assert_eq!(symbol, "BTC/USDT");
            assert!(error.contains("invalid api key"));
        }
        other => panic!("expected failure event, got {:?}", other),
    }
    assert!(!dir.path().join("BTC_USDT").exists());
}

#[tokio::test(start_paused = true)]
async fn transient_llm_error_is_retried() {
    let dir = TempDir::new().unwrap();
    let failures = Arc::new(AtomicU32::new(0));
    let f = failures.clone();
    let llm = Arc::new(ScriptedLlm::new(move |messages, _| {
        if first(messages).starts_with("You are the research manager") && f.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(DeskError::Llm("HTTP 503 - upstream overloaded".into()));
        }
        Ok(LlmResponse::text("**FINAL DECISION: HOLD**"))
    }));
    let cfg = config(&dir, &["news"], 1);

    let desk = PipelineOrchestrator::from_config(&cfg, llm.clone(), Arc::new(FakeExchange::new())).unwrap();
    let outcome = desk.run(trade_date()).await.unwrap();

    assert_eq!(llm.count_prompts("You are the research manager"), 3);
    assert!(outcome.state.debate.judge_decision.is_some());
}

#[tokio::test(start_paused = true)]
async fn buy_in_test_mode_is_simulated_and_audited() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(desk_script(
        "Risk is acceptable.\n```json\n{\"action\": \"BUY\", \"confidence\": 0.8, \"stop_loss\": 58000, \"take_profit\": 65000, \"reason\": \"breakout\"}\n```\n**FINAL DECISION: BUY**",
    ));
    let exchange = Arc::new(FakeExchange::new());
    let mut cfg = config(&dir, &["market"], 1);
    cfg.execution.auto_execute = true;
    cfg.execution.test_mode = true;

    let observer = Arc::new(ChannelObserver::new(8));
    let mut events = observer.subscribe();
    let desk = PipelineOrchestrator::from_config(&cfg, llm, exchange.clone())
        .unwrap()
        .with_observer(observer);
    let outcome = desk.run(trade_date()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Buy);
    assert_eq!(outcome.execution.len(), 1);
    let result = &outcome.execution[0];
    assert!(result.success);
    assert!(result.test_mode);
    assert_eq!(result.reason, "breakout");
    assert!(exchange.mutating_calls().is_empty());

    let path = outcome.audit_path.clone().expect("audit written");
    assert!(path.starts_with(dir.path().join("BTC_USDT").join("logs")));
    let record: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let day = &record["2024-05-01"];
    assert_eq!(day["crypto_symbol"], "BTC/USDT");
    assert!(day["final_trade_decision"].as_str().unwrap().contains("FINAL DECISION: BUY"));
    assert_eq!(day["market_report"], "Trend is up, momentum intact.");

    match events.recv().await.unwrap() {
        RunEvent::Completed(summary) => {
            assert_eq!(summary.verdict, Verdict::Buy);
            assert_eq!(summary.executions.len(), 1);
            assert!(summary.executions[0].test_mode);
        }
        other => panic!("expected completion event, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn decision_is_not_executed_without_auto_execute() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(desk_script("**FINAL DECISION: SELL**"));
    let exchange = Arc::new(FakeExchange::new());
    let mut cfg = config(&dir, &["sentiment"], 1);
    cfg.execution.auto_execute = false;
    cfg.execution.test_mode = false;

    let desk = PipelineOrchestrator::from_config(&cfg, llm, exchange.clone()).unwrap();
    let outcome = desk.run(trade_date()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Sell);
    assert!(outcome.execution.is_empty());
    assert!(exchange.mutating_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_exchange_error_inside_a_tool_is_retried() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(desk_script("**FINAL DECISION: HOLD**"));
    let exchange = Arc::new(FakeExchange::new().kline_outages(1));
    let cfg = config(&dir, &["market"], 1);

    let desk = PipelineOrchestrator::from_config(&cfg, llm.clone(), exchange.clone()).unwrap();
    desk.run(trade_date()).await.unwrap();

    let kline_reads = exchange.calls().iter().filter(|c| c.starts_with("get_klines")).count();
    assert_eq!(kline_reads, 2);

    let answer = llm
        .calls()
        .into_iter()
        .flat_map(|(_, msgs)| msgs)
        .find(|m| m.role == Role::Tool)
        .expect("tool answer sent back");
    assert!(answer.content.contains("candles"));
    assert!(!answer.content.starts_with("Error:"));
}

#[tokio::test(start_paused = true)]
async fn tool_outside_the_role_offer_is_refused() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedLlm::new(|messages, _| {
        let prompt = first(messages);
        if prompt.starts_with("You are the sentiment analyst") {
            if messages.iter().any(|m| m.role == Role::Tool) {
                return Ok(LlmResponse::text("Crowd is cautious."));
            }
            return Ok(candle_request("call-x"));
        }
        Ok(LlmResponse::text("**FINAL DECISION: HOLD**"))
    }));
    let exchange = Arc::new(FakeExchange::new());
    let cfg = config(&dir, &["sentiment"], 1);

    let desk = PipelineOrchestrator::from_config(&cfg, llm.clone(), exchange.clone()).unwrap();
    let outcome = desk.run(trade_date()).await.unwrap();

    let answer = llm
        .calls()
        .into_iter()
        .flat_map(|(_, msgs)| msgs)
        .find(|m| m.role == Role::Tool)
        .expect("tool answer sent back");
    assert!(answer.content.starts_with("Error:"));
    assert!(answer.content.contains("not offered"));
    assert!(!exchange.calls().iter().any(|c| c.starts_with("get_klines")));
    assert_eq!(outcome.state.report("sentiment"), Some("Crowd is cautious."));
}

#[tokio::test(start_paused = true)]
async fn prose_levels_are_not_sent_as_order_prices() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(desk_script(
        "Keep a stop-loss 3% below entry and take-profit 5% above.\n**FINAL DECISION: BUY**",
    ));
    let exchange = Arc::new(FakeExchange::new());
    let mut cfg = config(&dir, &["sentiment"], 1);
    cfg.execution.auto_execute = true;
    cfg.execution.test_mode = false;

    let desk = PipelineOrchestrator::from_config(&cfg, llm, exchange.clone()).unwrap();
    let outcome = desk.run(trade_date()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Buy);
    assert_eq!(outcome.structured.source, RecordSource::Prose);
    assert!(outcome.structured.stop_loss.is_some());

    let orders = exchange.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].kind, OrderKind::Market);
    assert_eq!(orders[0].position_side, PositionSide::Long);
    assert!(orders.iter().all(|o| o.stop_price.is_none()));
    assert!(outcome.execution[0].success);
}

#[tokio::test(start_paused = true)]
async fn record_levels_are_attached_to_the_opened_leg() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(desk_script(
        "```json\n{\"action\": \"BUY\", \"stop_loss\": 58000, \"take_profit\": 65000}\n```\n**FINAL DECISION: BUY**",
    ));
    let exchange = Arc::new(FakeExchange::new());
    let mut cfg = config(&dir, &["sentiment"], 1);
    cfg.execution.auto_execute = true;
    cfg.execution.test_mode = false;

    let desk = PipelineOrchestrator::from_config(&cfg, llm, exchange.clone()).unwrap();
    let outcome = desk.run(trade_date()).await.unwrap();

    let orders = exchange.orders();
    assert_eq!(orders.len(), 3);
    assert_eq!(orders[1].kind, OrderKind::StopMarket);
    assert_eq!(orders[1].stop_price, Some(dec!(58000)));
    assert_eq!(orders[2].kind, OrderKind::TakeProfitMarket);
    assert_eq!(orders[2].stop_price, Some(dec!(65000)));
    assert!(outcome.execution[0].warnings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn non_analyst_or_repeated_roles_are_rejected_before_any_call() {
    for analysts in [&["market", "trader"][..], &["market", "market"][..]] {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(desk_script("**FINAL DECISION: HOLD**"));
        let cfg = config(&dir, analysts, 1);

        let err = PipelineOrchestrator::from_config(&cfg, llm.clone(), Arc::new(FakeExchange::new()))
            .err()
            .expect("bad analyst selection must fail");
        assert!(matches!(err, DeskError::Validation(_)), "{:?}: {}", analysts, err);
        assert!(llm.calls().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_analyst_role_is_rejected() {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(desk_script("**FINAL DECISION: HOLD**"));
    let cfg = config(&dir, &["astrology"], 1);

    let err = PipelineOrchestrator::from_config(&cfg, llm, Arc::new(FakeExchange::new()))
        .err()
        .expect("unknown role must fail");
    assert!(matches!(err, DeskError::Validation(_)));
}
