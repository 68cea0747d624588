use anyhow::{ensure, Context};

use grove::builder::Builder;

pub fn register(b: &mut Builder) {
    b.describe("parsing", |b| {
        b.test_sync("parses integers", |_| {
            let n: i64 = "-42".parse().context("parsing -42")?;
            ensure!(n == -42);
            Ok(())
        });
        b.test_sync("rejects garbage", |_| {
            ensure!("4x2".parse::<i64>().is_err());
            Ok(())
        });
        b.test_skip("parses locale digits", |_| async { Ok(()) });
    });

    b.describe("case", |b| {
        b.test_sync("uppercases ascii", |_| {
            ensure!("grove".to_uppercase() == "GROVE");
            Ok(())
        });
        b.test_sync("keeps unicode length", |scope| {
            let word = "straße";
            scope.log(format!("{} chars, {} bytes", word.chars().count(), word.len()));
            ensure!(word.chars().count() == 6);
            Ok(())
        });
    });

    b.describe_skip("normalization", |b| {
        b.test_sync("folds compatibility forms", |_| Ok(()));
    });
}
