//! Asynchronous bodies: sleeps, a timeout and a detached failure.

use anyhow::bail;
use std::time::Duration;
use tokio::time::sleep;

use grove::builder::Builder;

pub fn register(b: &mut Builder) {
    b.describe("sleeping", |b| {
        b.test("finishes within its timeout", |_| async {
            sleep(Duration::from_millis(10)).await;
            Ok(())
        })
        .timeout(Duration::from_millis(500));

        b.test("never settles", |_| async {
            futures::future::pending::<()>().await;
            Ok(())
        })
        .timeout(Duration::from_millis(50));
    });

    b.describe("detached work", |b| {
        b.test("fails after the body returns", |scope| async move {
            scope.spawn(async {
                sleep(Duration::from_millis(1)).await;
                bail!("background write rejected")
            });
            Ok(())
        })
        .grace_period(Duration::from_millis(50));

        b.test("waits for its own task", |scope| async move {
            let (tx, rx) = tokio::sync::oneshot::channel();
            scope.spawn(async move {
                let _ = tx.send(7);
                Ok(())
            });
            let value = rx.await?;
            scope.log(format!("received {value}"));
            Ok(())
        });
    });
}
