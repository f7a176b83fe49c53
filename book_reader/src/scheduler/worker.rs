use std::sync::Arc;

use crate::decode::{decode, format_hint};
use crate::error::{DecodeError, PageError};

use super::{Claimed, PageResult, Shared};

pub(super) async fn run(shared: Arc<Shared>, worker: usize) {
    log::debug!("Extraction worker {} started", worker);
    loop {
        // Register interest before looking at the queue so a submit between the
        // check and the await still wakes us.
        let notified = shared.wake().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if shared.is_shut_down() {
            break;
        }
        match shared.claim() {
            Some(job) => execute(&shared, job).await,
            None => notified.await,
        }
    }
    log::debug!("Extraction worker {} stopped", worker);
}

async fn execute(shared: &Shared, job: Claimed) {
    let Claimed {
        key,
        book,
        page,
        exclusive,
    } = job;

    let extracted = book.adapter().extract(&key.entry).await;
    if exclusive {
        shared.release(key.book);
    }

    let result: PageResult = match extracted {
        Err(e) => Err(PageError::Extraction(e)),
        Ok(raw) => {
            if shared.cancel_if_stale(&key) {
                return;
            }
            let hint = format_hint(key.entry.as_str());
            let limits = shared.limits().clone();
            match tokio::task::spawn_blocking(move || decode(page, &raw, hint, &limits)).await {
                Ok(Ok(decoded)) => Ok(Arc::new(decoded)),
                Ok(Err(e)) => Err(PageError::Decode(e)),
                Err(e) => Err(PageError::Decode(DecodeError::Corrupt(e.to_string()))),
            }
        }
    };
    shared.finish(&key, result);
}
