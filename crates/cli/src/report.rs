//! Console reports.

use trapped_backtest::{GridReport, ScanSummary, WindowReport};
use trapped_backtest::window_stats::{WindowDistribution, WindowRecommendation};
use trapped_core::config::TriggerConfig;
use trapped_core::TimeSlot;
use trapped_ingestion::{RangeBarBuilder, TickReadStats};
use trapped_ingestion::cleaner::CleanStats;

const RULE: &str = "============================================================";

pub fn print_bar_build(read: &TickReadStats, builder: &RangeBarBuilder, written: usize) {
    let classes = builder.classification_stats();
    println!("{RULE}");
    println!("RANGE BARS");
    println!("{RULE}");
    println!("Tick rows:        {} ({} dropped)", read.rows, read.dropped);
    println!("Ticks skipped:    {}", builder.skipped_ticks());
    println!("Bars written:     {}", written);
    println!("Phantom bars:     {}", builder.phantom_bars());
    println!(
        "Buy/sell/mid:     {} / {} / {} ({:.1}% ambiguous)",
        classes.buy_ticks,
        classes.sell_ticks,
        classes.ambiguous_ticks,
        classes.ambiguous_frac() * 100.0
    );
    println!("Final delta:      {:.0}", builder.delta().value());
}

pub fn print_clean(stats: &CleanStats) {
    println!("{RULE}");
    println!("CLEANED BARS");
    println!("{RULE}");
    println!("Bars in:          {}", stats.bars_in);
    println!("Bars out:         {}", stats.bars_out);
    println!("Skipped:          {}", stats.skipped);
    println!("Phantoms dropped: {}", stats.phantoms_dropped);
    println!("Levels merged:    {}", stats.merged_levels);
}

pub fn print_scan_summary(params: &TriggerConfig, slot: TimeSlot, s: &ScanSummary) {
    println!("{RULE}");
    println!(
        "SCAN n={} vol={:.2} agg={:.2} exh={:.2} slot={}",
        params.n_extremes,
        params.vol_threshold,
        params.aggression_threshold,
        params.exhaustion_threshold,
        slot
    );
    println!("{RULE}");
    println!("Triggers:         {} ({} reversals)", s.n_trades, s.n_reversals);
    println!("Winrate:          {:.1}%", s.winrate);
    println!(
        "Profit:           avg {:.2} / max {:.2} pts over {:.1} bars",
        s.avg_profit, s.max_profit, s.avg_bars
    );
    println!("Profit factor:    {:.2}", s.profit_factor);
    println!(
        "Divergent:        {} ({:.1}% WR) vs {} ({:.1}% WR)",
        s.n_divergent, s.winrate_divergent, s.n_non_divergent, s.winrate_non_divergent
    );
    println!(
        "Quality:          div {:.0}% / coh {:.0}% / exh {:.0}%",
        s.divergent_rate, s.coherent_rate, s.exhaustion_rate
    );
    println!(
        "Position:         HIGH {:.0}% / LOW {:.0}% / BOTH {:.0}%",
        s.high_trigger_rate, s.low_trigger_rate, s.both_trigger_rate
    );
    println!("Score:            {:.1}", s.final_score);
}

pub fn print_grid_report(report: &GridReport, top_n: usize) {
    println!("{RULE}");
    println!(
        "GRID: {} of {} combinations kept",
        report.rows().len(),
        report.combinations
    );
    println!("{RULE}");

    for (rank, row) in report.top(top_n).iter().enumerate() {
        let p = &row.params.trigger;
        let s = &row.summary;
        println!();
        println!("#{} score {:.1}", rank + 1, s.final_score);
        println!(
            "   params: vol={:.2} agg={:.2} exh={:.2} slot={}",
            p.vol_threshold, p.aggression_threshold, p.exhaustion_threshold, row.params.time_slot
        );
        println!(
            "   WR={:.1}% profit={:.2}pts PF={:.2} trades={}",
            s.winrate, s.avg_profit, s.profit_factor, s.n_trades
        );
        println!(
            "   div={:.0}% coh={:.0}% exh={:.0}%",
            s.divergent_rate, s.coherent_rate, s.exhaustion_rate
        );
    }

    let Some(kit) = report.identikit(top_n) else {
        return;
    };
    println!();
    println!("IDENTIKIT (mean of top {})", kit.rows);
    println!(
        "   thresholds: vol={:.2} agg={:.2} exh={:.3}",
        kit.vol_threshold, kit.aggression_threshold, kit.exhaustion_threshold
    );
    println!(
        "   WR={:.1}% profit={:.2}pts PF={:.2} bars={:.1}",
        kit.winrate, kit.avg_profit, kit.profit_factor, kit.avg_bars
    );
    println!(
        "   div={:.0}% coh={:.0}% exh={:.0}% HIGH={:.0}% LOW={:.0}%",
        kit.divergent_rate,
        kit.coherent_rate,
        kit.exhaustion_rate,
        kit.high_trigger_rate,
        kit.low_trigger_rate
    );
    if let Some(slot) = report.best_time_slot(top_n) {
        println!("   best slot: {slot}");
    }

    if let Some(best) = report.rows().first() {
        let (w, l) = (&best.summary.winner_profile, &best.summary.loser_profile);
        println!();
        println!("WINNERS vs LOSERS (best row)");
        println!(
            "   divergent {:.1}% vs {:.1}%",
            w.divergent_rate, l.divergent_rate
        );
        println!("   coherent  {:.1}% vs {:.1}%", w.coherent_rate, l.coherent_rate);
        println!(
            "   exhausted {:.1}% vs {:.1}%",
            w.exhaustion_rate, l.exhaustion_rate
        );
    }
}

fn print_distribution(label: &str, d: &WindowDistribution) {
    println!(
        "   {label}: mean {:.1} median {:.1} std {:.1} | p25 {:.0} p75 {:.0} p95 {:.0} | zero {}",
        d.mean, d.median, d.std, d.percentiles.p25, d.percentiles.p75, d.percentiles.p95, d.zero
    );
}

fn format_order(order: &[usize], rates: &std::collections::BTreeMap<usize, f64>) -> String {
    order
        .iter()
        .map(|w| format!("{w} ({:.1}%)", rates.get(w).copied().unwrap_or(0.0) * 100.0))
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn print_recommendation(rec: &WindowRecommendation) {
    println!(
        "   before order: {}",
        format_order(&rec.before_order, &rec.before_success_rates)
    );
    println!(
        "   after order:  {}",
        format_order(&rec.after_order, &rec.after_success_rates)
    );
}

pub fn print_window_report(report: &WindowReport) {
    let a = &report.analysis;
    println!("{RULE}");
    println!(
        "VALIDATION WINDOWS {}..={} (stop tolerance {})",
        a.min_window, a.max_window, report.stop_tolerance
    );
    println!("{RULE}");

    for (name, side, rec) in [
        ("HIGH", &a.high, &report.recommendations.high),
        ("LOW", &a.low, &report.recommendations.low),
    ] {
        println!();
        println!("{name} trigger ({} samples)", side.before.samples);
        print_distribution("before", &side.before);
        print_distribution("after ", &side.after);
        print_recommendation(rec);
    }
}
