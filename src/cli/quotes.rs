use comfy_table::Cell;
use rust_decimal::Decimal;

use super::ui;
use crate::core::MarketSnapshot;

pub fn display_name(symbol: &str) -> &str {
    match symbol {
        "USD" => "US Dollar",
        "EUR" => "Euro",
        "BTC" => "Bitcoin",
        "ETH" => "Ethereum",
        "GBP" => "Pound Sterling",
        "JPY" => "Japanese Yen",
        "CAD" => "Canadian Dollar",
        other => other,
    }
}

/// Renders the quote table for `symbols`, in that order, plus the update footer.
pub fn render_snapshot(
    snapshot: &MarketSnapshot,
    symbols: &[String],
    base_currency: &str,
    timestamp_format: &str,
) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Name"),
        ui::header_cell(&format!("Bid ({base_currency})")),
        ui::header_cell("Change"),
        ui::header_cell("Trend"),
        ui::header_cell("Low"),
        ui::header_cell("High"),
    ]);

    for symbol in symbols {
        let quote = snapshot.quotes.as_ref().and_then(|q| q.get(symbol));
        let values: Vec<Decimal> = snapshot
            .series_for(symbol)
            .iter()
            .map(|p| p.value)
            .collect();

        table.add_row(vec![
            Cell::new(symbol),
            Cell::new(display_name(symbol)),
            ui::format_optional_cell(quote.map(|q| q.bid), ui::format_price),
            match quote {
                Some(q) => ui::change_cell(q.change_percent),
                None => ui::format_optional_cell(None, ui::format_price),
            },
            Cell::new(ui::sparkline(&values)),
            ui::format_optional_cell(values.iter().min().copied(), ui::format_price),
            ui::format_optional_cell(values.iter().max().copied(), ui::format_price),
        ]);
    }

    let mut output = table.to_string();
    let footer = match snapshot.last_updated_label(timestamp_format) {
        Some(label) => ui::style_text(&format!("Last updated: {label}"), ui::StyleType::Subtle),
        None => ui::style_text("No quotes received yet", ui::StyleType::Error),
    };
    output.push_str("\n\n");
    output.push_str(&footer);
    output
}
