use env_logger::Builder;
use log::{info, LevelFilter};
use std::path::Path;

use minidb_tx::{Database, DatabaseConfig, IsolationLevel};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    Builder::new().filter_level(LevelFilter::Info).init();

    info!("minidb transactional storage demo");

    let db_path = Path::new("minidb_demo");
    let config = DatabaseConfig::new(db_path).with_checkpoint_interval(None);
    let mut db = Database::open(config)?;

    let block = db.file_manager().append("accounts.tbl")?;

    // A committed write
    let mut tx1 = db.begin()?;
    tx1.write_int(&block, 0, 100)?;
    tx1.write_string(&block, 4, "alice")?;
    tx1.commit()?;
    info!("{} committed balance 100 for alice", tx1.id());

    // A rolled back write
    let mut tx2 = db.begin_with(IsolationLevel::RepeatableRead)?;
    tx2.write_int(&block, 0, 999)?;
    tx2.rollback()?;
    info!("{} rolled back its write", tx2.id());

    let mut reader = db.begin()?;
    let balance = reader.read_int(&block, 0)?;
    let owner = reader.read_string(&block, 4)?;
    reader.commit()?;
    info!("{} sees {} = {} for {}", reader.id(), block, balance, owner);

    db.checkpoint()?;
    db.close()?;

    // Clean up
    db.files().cleanup()?;

    Ok(())
}
