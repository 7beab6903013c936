//! STRATA - SSTable Persistence Layer
//! Command-line inspection of table directories.

use std::sync::Arc;

use strata::config::Config;
use strata::error::Result;
use strata::sstables::loader::{scan_table_dir, ScanReport};
use strata::sstables::{ShardContext, Sstable};
use strata::types::{CellLiveness, Partition, Schema};

fn usage() {
    println!();
    println!("  ╔═══════════════════════════════════════════╗");
    println!("  ║        STRATA SSTable Inspector           ║");
    println!("  ╚═══════════════════════════════════════════╝");
    println!();
    println!("  Commands:");
    println!("    scan <data_dir> <keyspace> <table>         - Recover and list instances");
    println!("    dump <data_dir> <keyspace> <table> <gen>   - Print the rows of one instance");
    println!();
}

async fn scan(ctx: &ShardContext, data_dir: &str, keyspace: &str, table: &str) -> Result<ScanReport> {
    let config = Config::new(data_dir);
    config.validate()?;
    let dir = config.table_dir(keyspace, table);
    scan_table_dir(ctx, &dir, Arc::new(Schema::new(keyspace, table))).await
}

async fn print_instance(sst: &Sstable) -> Result<()> {
    let meta = sst.metadata();
    println!(
        "  {}  partitions={} rows={} cells={} data={} bytes on_disk={} bytes",
        sst.descriptor(),
        meta.partitions,
        meta.rows,
        meta.cells,
        sst.data_size().await?,
        sst.bytes_on_disk().await?
    );
    Ok(())
}

fn print_partition(schema: &Schema, partition: &Partition) {
    println!("  [{}]", partition.key.with_schema(schema));
    for row in partition.all_rows() {
        match &row.clustering {
            Some(ck) => println!("    row {}", ck.with_schema(schema)),
            None => println!("    static row"),
        }
        for cell in &row.cells {
            let value = String::from_utf8_lossy(&cell.value);
            match cell.liveness {
                CellLiveness::Live => {
                    println!("      {} @{} = \"{}\"", cell.column, cell.timestamp, value)
                }
                CellLiveness::Expiring { ttl, expiry } => println!(
                    "      {} @{} = \"{}\" ttl={} expires={}",
                    cell.column,
                    cell.timestamp,
                    value,
                    ttl.seconds(),
                    expiry
                ),
                CellLiveness::Deleted { deletion_time } => println!(
                    "      {} @{} deleted at {}",
                    cell.column, cell.timestamp, deletion_time
                ),
            }
        }
    }
}

async fn run(args: &[String]) -> Result<bool> {
    let ctx = ShardContext::new(0);
    match args {
        [cmd, data_dir, keyspace, table] if cmd == "scan" => {
            let report = scan(&ctx, data_dir, keyspace, table).await?;
            for sst in &report.loadable {
                print_instance(sst).await?;
            }
            for generation in &report.purged {
                println!("  purged generation {}", generation);
            }
            for (generation, err) in &report.rejected {
                println!("  rejected generation {}: {}", generation, err);
            }
            println!("  ({} loadable)", report.loadable.len());
            println!();
            println!("{}", ctx.stats().report());
            Ok(true)
        }
        [cmd, data_dir, keyspace, table, generation] if cmd == "dump" => {
            let wanted: u64 = match generation.parse() {
                Ok(g) => g,
                Err(_) => return Ok(false),
            };
            let report = scan(&ctx, data_dir, keyspace, table).await?;
            let Some(sst) = report.loadable.iter().find(|s| s.generation().0 == wanted) else {
                println!("  No loadable generation {}", wanted);
                return Ok(true);
            };
            sst.verify_digest(&ctx).await?;
            for partition in sst.read_partitions(&ctx).await? {
                print_partition(sst.schema(), &partition);
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(true) => {}
        Ok(false) => {
            usage();
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("[ERROR] {}", err);
            if err.is_corruption() {
                eprintln!("[ERROR] The instance looks corrupt or was written by another format version.");
            }
            std::process::exit(1);
        }
    }
}
