//! Human-readable usage reports.
//!
//! Rendering is pure: callers pass in the rows and the current time.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{NaiveDate, NaiveTime, Timelike};

use super::tracker::{DailyUsage, LimitWarning, ProviderLimit};

/// Health tier for a provider's share of its daily limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageStatus {
    Healthy,
    Moderate,
    Warning,
    Critical,
}

impl UsageStatus {
    pub fn from_percent(percent: f64) -> Self {
        if percent >= 90.0 {
            Self::Critical
        } else if percent >= 80.0 {
            Self::Warning
        } else if percent >= 50.0 {
            Self::Moderate
        } else {
            Self::Healthy
        }
    }
}

impl std::fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "HEALTHY",
            Self::Moderate => "MODERATE",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        })
    }
}

fn progress_bar(percent: f64) -> String {
    let filled = ((percent / 10.0) as usize).min(10);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(10 - filled))
}

fn calls_for(usage: &[(String, u64)], provider: &str) -> u64 {
    usage
        .iter()
        .find(|(p, _)| p == provider)
        .map(|(_, c)| *c)
        .unwrap_or(0)
}

/// Today's report with a bar and status tier per limited provider.
pub fn today_report(usage: &[(String, u64)], limits: &[ProviderLimit], now: NaiveTime) -> String {
    let mut out = format!("*API Usage Today ({})*\n\n", now.format("%H:%M"));

    if usage.is_empty() {
        out.push_str("No API calls recorded yet today.\n");
        out.push_str("Usage is tracked automatically as you go.");
        return out;
    }

    let mut total = 0;
    for limit in limits {
        let calls = calls_for(usage, &limit.provider);
        total += calls;

        let Some(daily) = limit.daily.filter(|d| *d > 0) else {
            let _ = writeln!(out, "{}: {} calls (unlimited)", limit.label, calls);
            continue;
        };

        let percent = calls as f64 / daily as f64 * 100.0;
        let _ = write!(
            out,
            "{}\n{} {:.1}%\n{} used / {} remaining\nStatus: {}\n\n",
            limit.label,
            progress_bar(percent),
            percent,
            calls,
            daily.saturating_sub(calls),
            UsageStatus::from_percent(percent),
        );
    }

    // Providers without a configured limit still count.
    total += usage
        .iter()
        .filter(|(p, _)| !limits.iter().any(|l| &l.provider == p))
        .map(|(_, c)| *c)
        .sum::<u64>();

    let _ = writeln!(out, "Total calls today: {}", total);

    let hour = now.hour();
    if hour > 0 && total > 0 {
        let projected = (total as f64 / hour as f64 * 24.0) as u64;
        let _ = write!(out, "Projected daily total: {} calls", projected);
    }

    out
}

/// Seven-day report grouped by date, newest first.
pub fn week_report(rows: &[DailyUsage]) -> String {
    if rows.is_empty() {
        return "No usage data for this week yet.".to_string();
    }

    let mut by_date: BTreeMap<NaiveDate, BTreeMap<&str, u64>> = BTreeMap::new();
    for row in rows {
        *by_date
            .entry(row.date)
            .or_default()
            .entry(row.provider.as_str())
            .or_default() += row.calls;
    }

    let mut out = String::from("*API Usage This Week*\n\n");
    for (date, providers) in by_date.iter().rev() {
        let total: u64 = providers.values().sum();
        let _ = writeln!(out, "{}: {} total calls", date.format("%Y-%m-%d"), total);
        for (provider, calls) in providers {
            let _ = writeln!(out, "  {}: {}", provider, calls);
        }
        out.push('\n');
    }
    out
}

/// Warning list, or an all-clear line.
pub fn warnings_report(warnings: &[LimitWarning]) -> String {
    if warnings.is_empty() {
        return "All APIs are within safe limits.".to_string();
    }
    let lines: Vec<String> = warnings.iter().map(ToString::to_string).collect();
    format!("API Limit Warnings:\n\n{}", lines.join("\n"))
}

/// Advice on balancing load across providers.
pub fn recommendation(usage: &[(String, u64)], limits: &[ProviderLimit], now: NaiveTime) -> String {
    if usage.is_empty() {
        return "No usage data yet to make recommendations.".to_string();
    }

    let share = |provider: &str| -> f64 {
        let daily = limits
            .iter()
            .find(|l| l.provider == provider)
            .and_then(|l| l.daily)
            .filter(|d| *d > 0);
        match daily {
            Some(d) => calls_for(usage, provider) as f64 / d as f64 * 100.0,
            None => 0.0,
        }
    };

    let groq = share("groq");
    let gemini = share("gemini");

    let mut out = String::from("*API Optimization Tips*\n\n");
    if gemini > groq * 2.0 {
        out.push_str(
            "Gemini is being used more than Groq relative to its limit. \
             Groq has a much higher daily allowance; consider keeping it primary.\n\n",
        );
    } else if groq > 70.0 {
        out.push_str("Groq usage is high. Gemini and Mistral can handle overflow.\n\n");
    } else {
        out.push_str("Your API usage is well balanced. No changes needed.\n\n");
    }

    if (9..=17).contains(&now.hour()) {
        out.push_str("Peak hours: Groq recommended (fastest response)\n");
    } else {
        out.push_str("Off-peak hours: any provider works well\n");
    }
    out
}
