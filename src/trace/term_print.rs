use anyhow::Result;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use super::job::{TraceJobStatus, TraceSummary};

pub struct TermPrinted;

pub trait TermPrintable {
    fn term_print(&self) -> Result<TermPrinted>;
}

impl TermPrintable for String {
    fn term_print(&self) -> Result<TermPrinted> {
        println!("{self}");
        Ok(TermPrinted)
    }
}

impl TermPrintable for Vec<TraceSummary> {
    fn term_print(&self) -> Result<TermPrinted> {
        let sorted = {
            let mut tmp = self.clone();
            tmp.sort_by(|a, b| {
                a.namespace
                    .cmp(&b.namespace)
                    .then_with(|| a.name.cmp(&b.name))
            });
            tmp
        };

        let mut table = table();

        table.set_header(vec![
            Cell::new("NAMESPACE").add_attribute(Attribute::Bold),
            Cell::new("NODE").add_attribute(Attribute::Bold),
            Cell::new("NAME").add_attribute(Attribute::Bold),
            Cell::new("STATUS").add_attribute(Attribute::Bold),
            Cell::new("AGE").add_attribute(Attribute::Bold),
        ]);

        for trace in sorted {
            let status_color = match trace.status {
                TraceJobStatus::Running => Color::Green,
                TraceJobStatus::Completed => Color::White,
                TraceJobStatus::Failed => Color::Red,
                TraceJobStatus::Unknown => Color::Yellow,
            };

            table.add_row(vec![
                Cell::new(&trace.namespace),
                Cell::new(&trace.node),
                Cell::new(&trace.name)
                    .fg(Color::Cyan)
                    .add_attribute(Attribute::Bold),
                Cell::new(trace.status.to_string())
                    .fg(status_color)
                    .add_attribute(Attribute::Bold),
                Cell::new(age(trace.start_time.as_ref())),
            ]);
        }

        println!("{table}");
        Ok(TermPrinted)
    }
}

fn age(start_time: Option<&Time>) -> String {
    let Some(start) = start_time else {
        return String::new();
    };
    let elapsed = k8s_openapi::chrono::Utc::now() - start.0;
    format_age(elapsed.num_seconds())
}

/// Compact kubectl-style durations: 42s, 12m, 3h, 2d.
fn format_age(seconds: i64) -> String {
    if seconds < 0 {
        return "0s".to_string();
    }
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h", seconds / 3600)
    } else {
        format!("{}d", seconds / 86_400)
    }
}

fn table() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table
}
