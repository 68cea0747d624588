use anyhow::ensure;

use grove::builder::Builder;

/// Tests that print straight to stdout instead of going through `Scope::log`
pub fn register(b: &mut Builder) {
    b.describe("printing", |b| {
        b.test_sync("prints a line", |_| {
            let value = 1 + 2;
            println!("debug: value is {value}");
            ensure!(value == 3);
            Ok(())
        });
        b.test_sync("dumps a large table", |_| {
            let mut checksum = 0u64;
            for row in 0..20_000u64 {
                println!("row {row:>5} | {:>10}", row * row);
                checksum += row;
            }
            ensure!(checksum == 199_990_000);
            Ok(())
        });
    });
}
