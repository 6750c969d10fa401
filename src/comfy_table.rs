use crate::indicators::Regime;
use crate::snapshot::Snapshot;
use chrono::{DateTime, Local, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

/// Display colour for a regime (overbought red, oversold teal, neutral amber).
pub fn regime_rgb(regime: Regime) -> (u8, u8, u8) {
    match regime {
        Regime::Overbought => (0xE6, 0x39, 0x46),
        Regime::Oversold => (0x2A, 0x9D, 0x8F),
        Regime::Neutral => (0xF4, 0xA2, 0x61),
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn build_table(snapshot: &Snapshot) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Rank").add_attribute(Attribute::Bold),
            Cell::new("Symbol").add_attribute(Attribute::Bold),
            Cell::new("Price (₹)")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("RSI ({})", snapshot.window))
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Status").add_attribute(Attribute::Bold),
        ]);

    for (i, row) in snapshot.rows.iter().enumerate() {
        let (r, g, b) = regime_rgb(row.regime);
        let colour = Color::Rgb { r, g, b };

        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&row.symbol).fg(Color::Cyan),
            Cell::new(format!("{:.2}", row.price)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", row.rsi))
                .fg(colour)
                .set_alignment(CellAlignment::Right),
            Cell::new(row.regime.label()).fg(colour),
        ]);
    }

    table
}

pub fn print_snapshot(snapshot: &Snapshot, skipped: usize) {
    let title = format!(
        "RSI Screener (Last Updated: {}) {} rows, {} overbought, {} oversold, {} skipped",
        format_timestamp(snapshot.generated_at),
        snapshot.rows.len(),
        snapshot.count(Regime::Overbought),
        snapshot.count(Regime::Oversold),
        skipped
    );

    if snapshot.is_empty() {
        println!("\n{}\nNo data found.", title);
        return;
    }

    println!("\n{}\n{}", title, build_table(snapshot));
}
