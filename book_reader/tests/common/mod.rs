#![allow(dead_code)]

use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use book_archive::prelude::*;
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use tokio::sync::Semaphore;

pub fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 30) as u8, (y * 30) as u8, 200])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub fn write_zip(path: &Path, files: &[(&str, Vec<u8>)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in files {
        zip.start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

pub fn page_name(page: usize) -> String {
    format!("page{:03}.png", page)
}

/// What a `MockAdapter` saw. Shared with the test.
#[derive(Default)]
pub struct Recorder {
    calls: AtomicUsize,
    order: Mutex<Vec<String>>,
    intervals: Mutex<Vec<(Instant, Instant)>>,
    gate: Option<Semaphore>,
}

impl Recorder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, name: &str) -> usize {
        self.order.lock().unwrap().iter().filter(|n| *n == name).count()
    }

    /// Entry names in the order extraction started.
    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn intervals(&self) -> Vec<(Instant, Instant)> {
        self.intervals.lock().unwrap().clone()
    }

    /// Let every blocked and future extraction through.
    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..500 {
            if self.calls() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} extractions, saw {}", n, self.calls());
    }
}

/// In-memory book of `pages` small PNGs named `page000.png`, `page001.png`, ...
pub struct MockAdapter {
    names: Vec<String>,
    png: Vec<u8>,
    random_access: bool,
    delay: Duration,
    broken: HashSet<String>,
    recorder: Arc<Recorder>,
}

pub struct MockBuilder {
    pages: usize,
    random_access: bool,
    gated: bool,
    delay: Duration,
    broken: HashSet<usize>,
}

impl MockBuilder {
    pub fn sequential(mut self) -> Self {
        self.random_access = false;
        self
    }

    /// Extractions block until `Recorder::open_gate`.
    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Page whose bytes are not an image.
    pub fn broken(mut self, page: usize) -> Self {
        self.broken.insert(page);
        self
    }

    pub fn build(self) -> (MockAdapter, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            gate: self.gated.then(|| Semaphore::new(0)),
            ..Default::default()
        });
        let adapter = MockAdapter {
            names: (0..self.pages).map(page_name).collect(),
            png: encode(3, 2, ImageFormat::Png),
            random_access: self.random_access,
            delay: self.delay,
            broken: self.broken.into_iter().map(page_name).collect(),
            recorder: recorder.clone(),
        };
        (adapter, recorder)
    }

    pub async fn book(self) -> (Arc<Book>, Arc<Recorder>) {
        let (adapter, recorder) = self.build();
        let book = Book::from_adapter("mock.cbz", Box::new(adapter))
            .await
            .unwrap();
        (Arc::new(book), recorder)
    }
}

impl MockAdapter {
    pub fn builder(pages: usize) -> MockBuilder {
        MockBuilder {
            pages,
            random_access: true,
            gated: false,
            delay: Duration::ZERO,
            broken: HashSet::new(),
        }
    }
}

#[async_trait::async_trait]
impl FormatAdapter for MockAdapter {
    fn kind(&self) -> FormatKind {
        FormatKind::Zip
    }

    fn supports_random_access(&self) -> bool {
        self.random_access
    }

    async fn list_entries(&self) -> Result<Vec<RawEntry>, OpenError> {
        Ok(self
            .names
            .iter()
            .map(|name| RawEntry::file(name.as_str(), self.png.len() as u64))
            .collect())
    }

    async fn extract(&self, id: &EntryId) -> Result<Vec<u8>, ExtractionError> {
        let start = Instant::now();
        self.recorder.calls.fetch_add(1, Ordering::SeqCst);
        self.recorder.order.lock().unwrap().push(id.to_string());
        if let Some(gate) = &self.recorder.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.recorder
            .intervals
            .lock()
            .unwrap()
            .push((start, Instant::now()));

        if !self.names.iter().any(|n| n == id.as_str()) {
            return Err(ExtractionError::NotFound(id.to_string()));
        }
        if self.broken.contains(id.as_str()) {
            return Ok(b"this is not an image".to_vec());
        }
        Ok(self.png.clone())
    }
}
