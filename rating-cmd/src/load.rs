//! Filling the rating database and listing what it holds.

use std::path::Path;

use log::info;
use rating_core::container::decompress;
use rating_db::Database;

/// Read container text from a file, decompressing `.gz` files.
pub fn read_container_file(path: &str) -> anyhow::Result<String> {
    if Path::new(path).extension().is_some_and(|ext| ext == "gz") {
        let bytes = std::fs::read(path)?;
        Ok(decompress(&bytes)?)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Store one container file in the database.
pub fn run_load(db_path: &str, file: &str, overwrite: bool, replace_base: bool) -> anyhow::Result<()> {
    let text = read_container_file(file)?;
    let db = Database::open(db_path)?;
    let count = db.store_ratings_text(&text, overwrite, replace_base)?;
    info!("Loaded {} ratings from {} into {}", count, file, db_path);
    Ok(())
}

/// Print every stored specification as JSON.
pub fn run_catalog(db_path: &str) -> anyhow::Result<()> {
    let db = Database::open(db_path)?;
    let catalog = db.query_catalog()?;
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rating_core::container::compress;

    const TEXT: &str = r#"{
      "spec": {"office_id": "SWT", "location_id": "KEYS", "template_id": "Stage;Flow.Linear", "version": "Production"},
      "ratings": [{"office_id": "SWT", "spec_id": "KEYS.Stage;Flow.Linear.Production",
                   "effective_date": "2020-01-01T00:00:00Z", "create_date": "2020-01-01T00:00:00Z",
                   "body": {"type": "table", "values": [{"ind": 0, "dep": 0}, {"ind": 10, "dep": 20}]}}]
    }"#;

    fn temp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("rating-cmd-{}-{}", std::process::id(), name))
    }

    #[test]
    fn reads_plain_and_compressed_files() {
        let plain = temp("plain.json");
        let gz = temp("set.json.gz");
        std::fs::write(&plain, TEXT).unwrap();
        std::fs::write(&gz, compress(TEXT).unwrap()).unwrap();
        assert_eq!(read_container_file(plain.to_str().unwrap()).unwrap(), TEXT);
        assert_eq!(read_container_file(gz.to_str().unwrap()).unwrap(), TEXT);
        std::fs::remove_file(plain).unwrap();
        std::fs::remove_file(gz).unwrap();
    }

    #[test]
    fn load_then_reload_needs_overwrite() {
        let file = temp("load.json");
        let db = temp("load.sqlite");
        std::fs::write(&file, TEXT).unwrap();
        let (file_s, db_s) = (file.to_str().unwrap(), db.to_str().unwrap());

        run_load(db_s, file_s, false, false).unwrap();
        assert!(run_load(db_s, file_s, false, false).is_err());
        run_load(db_s, file_s, true, false).unwrap();
        assert_eq!(Database::open(db_s).unwrap().query_catalog().unwrap()[0].rating_count, 1);

        std::fs::remove_file(&file).unwrap();
        std::fs::remove_file(&db).unwrap();
    }
}
