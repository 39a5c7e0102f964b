//! Text rendering shared by the loglens binaries.

use loglens_core::Summary;

pub fn print_summary(summary: &Summary) {
    println!("Summary for {}", summary.subject_id);
    println!("================================================");
    println!("Total lines:     {}", summary.total_lines);
    println!("Parsed lines:    {}", summary.parsed_lines());
    println!("Unique clients:  {}", summary.unique_client_count);
    println!("Digest:          {}", summary.content_digest);
    println!(
        "Computed:        {}",
        summary.computed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    println!();
    println!("Status codes:");
    for (status, count) in &summary.status_counts {
        println!("  {:<6} {}", status, count);
    }

    println!();
    println!("Top clients:");
    for entry in &summary.top_clients {
        println!("  {:<40} {}", entry.key, entry.count);
    }

    println!();
    println!("Top paths:");
    for entry in &summary.top_paths {
        println!("  {:<40} {}", entry.key, entry.count);
    }

    println!();
    println!("Events per minute:");
    for minute in &summary.errors_over_time {
        println!("  {}  {}", minute.minute, minute.count);
    }
}
