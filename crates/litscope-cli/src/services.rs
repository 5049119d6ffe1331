//! Wiring of the concrete collaborators from an [`AppConfig`].

use std::sync::Arc;

use anyhow::{Context, Result};
use litscope_ai::{GenerateOptions, LanguageModel, OllamaClient, QualityValidator, SummarizationScheduler};
use litscope_core::{AppConfig, LibraryIndex, ProgressStore};
use litscope_science::sources::{ArxivSource, SemanticScholarSource, UnpaywallSource};
use litscope_science::{DownloadManager, LopdfExtractor, PaperSource, RateLimitedClient, SearchAggregator};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::workflow::WorkflowOrchestrator;

/// Every component of the pipeline, built once per process.
pub struct Services {
    pub config: AppConfig,
    pub library: Arc<LibraryIndex>,
    pub progress: Arc<ProgressStore>,
    pub aggregator: Arc<SearchAggregator>,
    pub downloads: Arc<DownloadManager>,
    pub scheduler: Arc<SummarizationScheduler>,
    pub llm: Arc<dyn LanguageModel>,
}

impl Services {
    pub fn from_config(config: AppConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("cannot create data directory {}", data_dir.display()))?;

        let library = Arc::new(
            LibraryIndex::open(config.library_path(), Some(config.bibliography_path()))
                .context("cannot open library index")?,
        );
        let progress = Arc::new(ProgressStore::new(config.progress_path(), config.archive_dir()));

        let sources = build_sources(&config)?;
        let aggregator = Arc::new(
            SearchAggregator::new(sources.clone())
                .with_title_threshold(config.search.title_similarity_threshold),
        );
        let fetcher = Arc::new(RateLimitedClient::from_config(&config.download)?);
        let downloads = Arc::new(DownloadManager::new(
            Arc::clone(&library),
            fetcher,
            sources,
            config.pdfs_dir(),
        ));

        let llm: Arc<dyn LanguageModel> = Arc::new(OllamaClient::from_config(&config.llm)?);
        let scheduler = Arc::new(
            SummarizationScheduler::new(
                Arc::clone(&llm),
                Arc::new(LopdfExtractor::new()),
                QualityValidator::new(config.validation.clone()),
                Arc::clone(&progress),
                config.summaries_dir(),
                config.summarize.clone(),
            )
            .with_generate_options(GenerateOptions::from_config(&config.llm))
            .with_shutdown(shutdown.clone()),
        );

        Ok(Self {
            config,
            library,
            progress,
            aggregator,
            downloads,
            scheduler,
            llm,
        })
    }

    pub fn orchestrator(&self, shutdown: watch::Receiver<bool>) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(
            Arc::clone(&self.aggregator),
            Arc::clone(&self.library),
            Arc::clone(&self.downloads),
            Arc::clone(&self.progress),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.llm),
            self.config.data_dir(),
        )
        .with_shutdown(shutdown)
    }
}

fn build_sources(config: &AppConfig) -> Result<Vec<Arc<dyn PaperSource>>> {
    let ua = &config.download.user_agent;
    let mut sources: Vec<Arc<dyn PaperSource>> = Vec::new();
    for name in &config.search.sources {
        match name.as_str() {
            "arxiv" => sources.push(Arc::new(ArxivSource::new(ua)?)),
            "semantic_scholar" => sources.push(Arc::new(SemanticScholarSource::from_env(
                &config.search.semantic_scholar_api_key_env,
                ua,
            )?)),
            "unpaywall" => match &config.search.polite_email {
                Some(email) => sources.push(Arc::new(UnpaywallSource::new(email.clone(), ua)?)),
                None => debug!("unpaywall disabled: search.polite_email is not set"),
            },
            other => warn!(source = other, "unknown source in config, ignored"),
        }
    }
    Ok(sources)
}
