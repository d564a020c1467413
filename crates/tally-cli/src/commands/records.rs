use tally_core::records::{Record, RecordStore};
use tally_core::util::compact_text;

use crate::cli::RecordCommands;
use crate::commands::common::{ensure_tracked, open_engine, Context};
use crate::error::CliError;

const RECORD_PREVIEW_CHARS: usize = 160;

pub async fn run_records(command: RecordCommands, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;

    match command {
        RecordCommands::Add { collection, json } => {
            let collection = ensure_tracked(&engine.workspace, &collection)?;
            let record = Record::from_json(&json)?;
            let id = record.id().to_string();
            engine.records.add(&collection, record).await?;
            println!("{id}");
        }
        RecordCommands::List {
            collection,
            limit,
            json,
        } => {
            let collection = ensure_tracked(&engine.workspace, &collection)?;
            let mut records = engine.records.get_all(&collection).await?;
            records.truncate(limit);

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No records in {collection}.");
            } else {
                for line in format_record_lines(&records)? {
                    println!("{line}");
                }
            }
        }
        RecordCommands::Delete { collection, id } => {
            let collection = ensure_tracked(&engine.workspace, &collection)?;
            let id = id.trim();
            if !engine.records.delete(&collection, id).await? {
                return Err(CliError::RecordNotFound(id.to_string()));
            }
            println!("Deleted {id} from {collection}");
        }
    }
    Ok(())
}

pub fn format_record_lines(records: &[Record]) -> Result<Vec<String>, CliError> {
    records
        .iter()
        .map(|record| {
            let body = serde_json::to_string(record)?;
            Ok(format!(
                "{}  {}",
                record.id(),
                compact_text(&body, RECORD_PREVIEW_CHARS)
            ))
        })
        .collect()
}
