//! Role instructions. Wording is deliberately short; the contract parts
//! (decision marker, JSON record) are what the rest of the pipeline relies on.

use super::state::RunState;

pub const DECISION_CONTRACT: &str = "End your answer with exactly one line of the form \
**FINAL DECISION: BUY**, **FINAL DECISION: SELL**, **FINAL DECISION: HOLD** or \
**FINAL DECISION: CLOSE**.";

pub const RECORD_CONTRACT: &str = "Before the final line, add a ```json block with the keys \
action (BUY|SELL|HOLD|CLOSE|CLOSE_LONG|CLOSE_SHORT), confidence (0-1), stop_loss, take_profit, \
leverage (1-125), position_size_pct (0-100) and reason. Use null for levels you do not set.";

pub fn analyst_system(role: &str, symbol: &str, date: &str, tools: &[&str]) -> String {
    let focus = match role {
        "market" => "price action and technical indicators (trend, momentum, volatility)",
        "crypto" => "derivatives structure: funding rate, order book depth and 24h statistics",
        "sentiment" => "market sentiment and positioning visible from price and volume",
        "news" => "macro and news flow relevant to the asset, using market data as context",
        other => other,
    };
    format!(
        "You are the {role} analyst on a crypto futures desk covering {symbol} on {date}. \
Focus on {focus}. Available tools: {tools}. Call tools to gather data, then write a concise \
report with a markdown table of key points. Do not make the final trading decision.",
        role = role,
        symbol = symbol,
        date = date,
        focus = focus,
        tools = if tools.is_empty() { "none".to_string() } else { tools.join(", ") },
    )
}

pub fn analyst_task(state: &RunState) -> String {
    format!("Analyze {} for trading on {}.", state.symbol, state.trade_date)
}

pub fn debater(bullish: bool, state: &RunState) -> String {
    let (stance, opponent) = if bullish {
        ("Bull", "bear")
    } else {
        ("Bear", "bull")
    };
    format!(
        "You are the {stance} researcher for {symbol}. Argue your case from the analyst \
reports and rebut the {opponent} directly.\n\n{reports}\n\nDebate so far:\n{history}\n\n\
Last opponent argument:\n{last}",
        stance = stance,
        symbol = state.symbol,
        opponent = opponent,
        reports = state.reports_digest(),
        history = state.debate.transcript(),
        last = state.debate.last_argument().unwrap_or("(none yet)"),
    )
}

pub fn research_judge(state: &RunState) -> String {
    format!(
        "You are the research manager. Weigh the bull/bear debate for {symbol} and commit to \
an investment plan with rationale and concrete levels.\n\nReports:\n{reports}\n\n\
Debate:\n{debate}\n\n{contract}",
        symbol = state.symbol,
        reports = state.reports_digest(),
        debate = state.debate.transcript(),
        contract = DECISION_CONTRACT,
    )
}

pub fn trader(state: &RunState) -> String {
    format!(
        "You are the futures trader for {symbol}. Turn the investment plan into an executable \
trade under hedge mode (separate long and short legs).\n\nInvestment plan:\n{plan}\n\n\
Current position:\n{position}\n\n{record}\n{contract}",
        symbol = state.symbol,
        plan = state.debate.judge_decision.as_deref().unwrap_or("(none)"),
        position = state.position_summary.as_deref().unwrap_or("unknown"),
        record = RECORD_CONTRACT,
        contract = DECISION_CONTRACT,
    )
}

pub fn risk_reviewer(stance: &str, state: &RunState) -> String {
    let brief = match stance {
        "Risky" => "champion high-reward opportunities and challenge excessive caution",
        "Safe" => "protect capital: stress leverage, liquidation distance and drawdown",
        _ => "balance both views and look for the risk-adjusted middle ground",
    };
    format!(
        "You are the {stance} risk analyst. {brief}.\n\nTrader plan:\n{plan}\n\n\
Discussion so far:\n{history}",
        stance = stance,
        brief = brief,
        plan = state.trader_plan.as_deref().unwrap_or("(none)"),
        history = state.risk_debate.transcript(),
    )
}

pub fn risk_judge(state: &RunState) -> String {
    format!(
        "You are the risk manager for {symbol}. Decide the final trade from the trader's plan \
and the risk discussion. Keep leverage and stop distance consistent with the position.\n\n\
Trader plan:\n{plan}\n\nRisk discussion:\n{history}\n\nCurrent position:\n{position}\n\n\
{record}\n{contract}",
        symbol = state.symbol,
        plan = state.trader_plan.as_deref().unwrap_or("(none)"),
        history = state.risk_debate.transcript(),
        position = state.position_summary.as_deref().unwrap_or("unknown"),
        record = RECORD_CONTRACT,
        contract = DECISION_CONTRACT,
    )
}
