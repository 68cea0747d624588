use anyhow::ensure;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use grove::builder::Builder;

pub fn register(b: &mut Builder) {
    b.describe("addition", |b| {
        b.test_sync("adds small numbers", |_| {
            ensure!(2 + 2 == 4, "2 + 2 != 4");
            Ok(())
        });
        b.test_sync("checked add overflows", |_| {
            ensure!(u8::MAX.checked_add(1).is_none());
            Ok(())
        });
    });

    b.describe("accumulator", |b| {
        let total = Arc::new(AtomicU64::new(0));

        let reset = total.clone();
        b.before_each(move |_| {
            let reset = reset.clone();
            async move {
                reset.store(10, Ordering::SeqCst);
                Ok(())
            }
        });

        let value = total.clone();
        b.test("adds to the seed", move |scope| {
            let value = value.clone();
            async move {
                let sum = value.fetch_add(5, Ordering::SeqCst) + 5;
                scope.log(format!("sum = {sum}"));
                ensure!(sum == 15, "expected 15, got {sum}");
                Ok(())
            }
        });

        let value = total.clone();
        b.test("starts from the seed again", move |_| {
            let value = value.clone();
            async move {
                ensure!(value.load(Ordering::SeqCst) == 10);
                Ok(())
            }
        });
    });

    b.describe("division", |b| {
        b.test_sync("rounds toward zero", |_| {
            ensure!(-7 / 2 == -3);
            Ok(())
        });
        b.test_sync("checked division by zero", |_| {
            ensure!(1i32.checked_div(0).is_none());
            Ok(())
        });
    });
}
