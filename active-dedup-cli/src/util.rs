use active_dedup::dto::{DedupConfig, Table};
use active_dedup::error::DedupError;
use active_dedup::util::{read_table, write_table};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

fn open(path: &Path) -> Result<File, DedupError> {
    File::open(path).map_err(|err| DedupError::io(format!("cannot open {}: {err}", path.display())))
}

pub fn pull_data_file(path: &Path, delimiter: u8) -> Result<Table, DedupError> {
    read_table(BufReader::new(open(path)?), delimiter)
}

pub fn push_result_file(path: &Path, table: &Table, delimiter: u8) -> Result<(), DedupError> {
    let file = File::create(path)
        .map_err(|err| DedupError::io(format!("cannot create {}: {err}", path.display())))?;
    write_table(BufWriter::new(file), table, delimiter)
}

pub fn read_config(path: &Path) -> Result<DedupConfig, DedupError> {
    serde_json::from_reader(BufReader::new(open(path)?))
        .map_err(|err| DedupError::invalid_config(format!("{}: {err}", path.display())))
}
