use csv::{ReaderBuilder, WriterBuilder};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::clustering::ScoredPair;
use crate::dto::Table;
use crate::error::DedupError;
use crate::features::{FeaturedPair, RecordPair};

pub const PAIRS_TABLE_FILE: &str = "pairs_table.csv";
pub const SCORED_PAIRS_TABLE_FILE: &str = "scored_pairs_table.csv";

/// Reads a delimited table with a header row.
pub fn read_table<R: Read>(reader: R, delimiter: u8) -> Result<Table, DedupError> {
    let mut reader = ReaderBuilder::new().delimiter(delimiter).from_reader(reader);
    let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|record| match record {
            Ok(rec) => Ok(rec.iter().map(String::from).collect()),
            Err(err) => match err.kind() {
                csv::ErrorKind::UnequalLengths { .. } => Err(DedupError::invalid_input(err)),
                _ => Err(DedupError::from(err)),
            },
        })
        .collect::<Result<Vec<Vec<String>>, DedupError>>()?;
    Ok(Table::new(columns, rows))
}

pub fn write_table<W: Write>(writer: W, table: &Table, delimiter: u8) -> Result<(), DedupError> {
    let mut writer = WriterBuilder::new().delimiter(delimiter).from_writer(writer);
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn pair_header(fields: &[String]) -> Vec<String> {
    let mut header = vec![String::from("row_id_1")];
    header.extend(fields.iter().map(|f| format!("{f}_1")));
    header.push(String::from("row_id_2"));
    header.extend(fields.iter().map(|f| format!("{f}_2")));
    header.push(String::from("similarities"));
    header
}

fn pair_row(pair: &RecordPair<'_>, similarities: &[f64]) -> Vec<String> {
    let mut row = vec![pair.left.row_id.to_string()];
    row.extend(pair.left.values.iter().cloned());
    row.push(pair.right.row_id.to_string());
    row.extend(pair.right.values.iter().cloned());
    row.push(
        similarities
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(";"),
    );
    row
}

/// Dumps featurized candidate pairs, pipe separated.
pub fn write_pairs_table(path: &Path, fields: &[String], pairs: &[FeaturedPair<'_>]) -> Result<(), DedupError> {
    let mut writer = WriterBuilder::new().delimiter(b'|').from_writer(File::create(path)?);
    writer.write_record(pair_header(fields))?;
    for featured in pairs {
        writer.write_record(pair_row(&featured.pair, &featured.similarities))?;
    }
    writer.flush()?;
    Ok(())
}

/// Dumps scored pairs with their match probability, pipe separated.
pub fn write_scored_pairs_table(
    path: &Path,
    fields: &[String],
    pairs: &[ScoredPair<'_>],
) -> Result<(), DedupError> {
    let mut writer = WriterBuilder::new().delimiter(b'|').from_writer(File::create(path)?);
    let mut header = pair_header(fields);
    header.push(String::from("score"));
    writer.write_record(header)?;
    for scored in pairs {
        let mut row = pair_row(&scored.pair, &scored.similarities);
        row.push(scored.score.to_string());
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
