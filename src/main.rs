use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;

use dupcheck::config::{Cli, Command, Config};
use dupcheck::guard::{ConfirmationIssuer, ExportGrant};
use dupcheck::logging::{self, source_label};
use dupcheck::storage::PhoneStore;
use dupcheck::table::{write_records, ExportFormat, PhoneCell, Table};
use dupcheck::workflow::{filter_batch, FilterOptions};

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(&cli);
    logging::init(config.verbosity, config.no_color);

    let store = PhoneStore::open(config.store)?;

    match cli.command {
        Command::Check {
            input,
            output,
            label,
            record,
            phone_cell,
        } => check(&store, &input, output, label, record, phone_cell),
        Command::Stats => stats(&store),
        Command::Export { output, format } => export(&store, output.as_deref(), format),
        Command::Clear => clear(&store),
    }
}

fn check(
    store: &PhoneStore,
    input: &Path,
    output: Option<PathBuf>,
    label: Option<String>,
    record: bool,
    phone_cell: PhoneCell,
) -> Result<(), Box<dyn Error>> {
    let table = Table::read_path(input)?;
    let label = label.unwrap_or_else(|| file_label(input));
    let options = FilterOptions {
        source_label: label,
        persist: record,
    };

    let rows = table.rows.clone();
    let outcome = filter_batch(store, rows, |row| table.phone_of(row), &options)?;

    let output = output.unwrap_or_else(|| default_output(input));
    table
        .with_rows(outcome.unique.clone())
        .write_path(&output, phone_cell)?;

    println!("rows checked:   {}", outcome.total);
    println!("new numbers:    {}", outcome.unique.len());
    println!("duplicates:     {}", outcome.duplicate_count);
    if record {
        println!(
            "recorded:       {} (source {})",
            outcome.inserted,
            source_label(&options.source_label)
        );
    }
    println!("written to:     {}", output.display());
    Ok(())
}

fn stats(store: &PhoneStore) -> Result<(), Box<dyn Error>> {
    let stats = store.stats()?;
    println!("store:          {}", store.path().display());
    println!("records:        {}", stats.total_records);
    println!("valid numbers:  {}", stats.valid_records);
    println!("sources:        {}", stats.source_labels);
    Ok(())
}

fn export(
    store: &PhoneStore,
    output: Option<&Path>,
    format: ExportFormat,
) -> Result<(), Box<dyn Error>> {
    // Running the binary against a store file is the permission check.
    let records = store.export_all(&ExportGrant::authorized())?;
    match output {
        Some(path) => {
            let file = BufWriter::new(File::create(path)?);
            write_records(&records, file, format)?;
            eprintln!("exported {} record(s) to {}", records.len(), path.display());
        }
        None => {
            let stdout = io::stdout();
            write_records(&records, stdout.lock(), format)?;
        }
    }
    Ok(())
}

fn clear(store: &PhoneStore) -> Result<(), Box<dyn Error>> {
    let total = store.stats()?.total_records;
    if total == 0 {
        println!("store is already empty");
        return Ok(());
    }

    let mut issuer = ConfirmationIssuer::default();
    let token = issuer.issue();
    print!(
        "This deletes all {total} record(s) in {}.\nType {} within {}s to confirm: ",
        store.path().display(),
        token.value,
        token.expires_in.as_secs()
    );
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let grant = issuer.confirm(&answer)?;

    let deleted = store.clear_all(&grant)?;
    println!("deleted {deleted} record(s)");
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "phones".to_string());
    input.with_file_name(format!("{stem}_unique.csv"))
}
