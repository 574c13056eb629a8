use std::path::PathBuf;

use anyhow::Result;

use operando::parsers;
use operando::schema::unit_of;

pub fn run(file: PathBuf) -> Result<()> {
    let dataset = parsers::parse_path(&file)?;

    println!("File:      {}", dataset.filename);
    println!("Label:     {}", dataset.label);
    println!(
        "Format:    {}",
        dataset.source_format.map(|s| s.as_str()).unwrap_or("unknown")
    );
    println!(
        "Technique: {}",
        dataset.technique.map(|t| t.as_str()).unwrap_or("unknown")
    );
    if let Some(timestamp) = dataset.timestamp {
        println!("Acquired:  {timestamp}");
    }
    println!("Rows:      {}", dataset.table.n_rows());
    if !dataset.cycles.is_empty() {
        println!("Cycles:    {:?}", dataset.cycles);
    }

    println!("Columns:");
    for name in dataset.columns() {
        match unit_of(name) {
            Some("") => println!("  {name}"),
            Some(unit) => println!("  {name} [{unit}]"),
            None => println!("  {name} (non-canonical)"),
        }
    }
    Ok(())
}
