// Shared fixtures for the drift-harvester integration tests.

pub mod extraction_tests;
pub mod pipeline_tests;
pub mod repair_tests;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use drift_harvester::{
    fetch::{Fetcher, RawDocument},
    BatchPipeline, FetchError, Ledger, PipelineOptions, RecordStore, SelectorConfig, SelectorStore,
};

pub const ORANGE: &str = "rgb(255, 165, 0)";

/// A temporary data directory laid out like a real deployment.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn selectors(&self) -> PathBuf {
        self.dir.path().join("selectors.json")
    }

    pub fn reference(&self) -> PathBuf {
        self.dir.path().join("reference.html")
    }

    pub fn ledger(&self) -> PathBuf {
        self.dir.path().join("used_links.txt")
    }

    pub fn records(&self) -> PathBuf {
        self.dir.path().join("records")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.dir.path().join("repair_audit.jsonl")
    }

    /// Writes the default selector template and opens a store over it.
    pub fn store(&self) -> Arc<SelectorStore> {
        self.store_with(SelectorConfig::default_template())
    }

    pub fn store_with(&self, config: SelectorConfig) -> Arc<SelectorStore> {
        config.save(&self.selectors()).expect("save selectors");
        Arc::new(SelectorStore::open(self.selectors()))
    }

    pub fn pipeline(&self, fetcher: Arc<dyn Fetcher>, store: Arc<SelectorStore>) -> BatchPipeline {
        BatchPipeline::new(
            fetcher,
            store,
            RecordStore::new(self.records()),
            Ledger::open(self.ledger()).expect("open ledger"),
            PipelineOptions::default(),
        )
    }

    pub fn ledger_entries(&self) -> Vec<String> {
        std::fs::read_to_string(self.ledger())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Serves canned pages and fails the identities it is told to fail.
/// Every call is recorded.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: HashMap<String, String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn serving(identities: &[String], html: &str) -> Self {
        Self {
            pages: identities.iter().map(|id| (id.clone(), html.to_string())).collect(),
            ..Default::default()
        }
    }

    pub fn serve(&mut self, identity: &str, html: &str) {
        self.pages.insert(identity.to_string(), html.to_string());
    }

    pub fn failing(mut self, identity: &str) -> Self {
        self.failing.insert(identity.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, identity: &str) -> Result<RawDocument, FetchError> {
        self.calls.lock().expect("calls lock").push(identity.to_string());
        if self.failing.contains(identity) {
            return Err(FetchError::Request(format!("connection reset for {}", identity)));
        }
        self.pages
            .get(identity)
            .map(|html| RawDocument {
                html: html.clone(),
                observed_identity: Some(identity.to_string()),
            })
            .ok_or_else(|| FetchError::NotFound {
                identity: identity.to_string(),
            })
    }
}

pub fn identities(n: usize) -> Vec<String> {
    (1..=n)
        .map(|i| format!("https://shop.example/product/item-{}/?from=grid", i))
        .collect()
}

/// A product page using the default template's class names. `price_class`
/// lets tests move the price node to a new class.
pub fn product_page(price_class: &str) -> String {
    format!(
        r#"<html>
<body>
  <div class="layout">
    <h1 class="lz6_28 tsHeadline550Medium">Кроссовки Lexsan</h1>
    <span class="{price_class}">1&#x2009;299,00&nbsp;BYN</span>
    <div class="RA-a1">Light running shoes.</div>
    <div class="r4k_28">
      <dl class="rk8_28"><dt class="rk7_28">Color</dt><dd class="r7k_28">black</dd></dl>
    </div>
    <div class="sx7_31"><span>4.8</span></div>
    <div class="rt1_31">
      <div class="r2t_31">
        <span class="p8u_31">Anna</span>
        <div class="x5p_31">1 March</div>
        <span class="p7x_31">Great fit</span>
        <div class="a5d25-a a5d25-a0"><svg style="color: {o}"></svg><svg style="color: {o}"></svg></div>
        <a class="y3p_31">Black</a>
        <img class="pw4_31 b933-a" src="https://cdn.example/a.jpg">
      </div>
      <div class="r2t_31">
        <div class="x5p_31">2 March</div>
        <span class="p7x_31">Runs small</span>
        <div class="a5d25-a a5d25-a0"><svg style="color: {o}"></svg></div>
        <a class="y3p_31">White</a>
      </div>
      <div class="r2t_31">
        <span class="p8u_31">Boris</span>
        <div class="x5p_31">3 March</div>
        <span class="p7x_31">Fine</span>
        <div class="a5d25-a a5d25-a0"><svg style="color: {o}"></svg><svg style="color: {o}"></svg><svg style="color: {o}"></svg></div>
        <a class="y3p_31">Black</a>
      </div>
    </div>
  </div>
</body>
</html>"#,
        price_class = price_class,
        o = ORANGE
    )
}
