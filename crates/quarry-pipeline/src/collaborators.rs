//! Collaborator traits consumed by the controller, plus the handle bundle
//! passed in at construction time.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use quarry_llm::{EmbeddingRequest, LlmClient, Request};
use quarry_types::{QuarryError, Result, Table};

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// A two-part chat prompt. Content is owned by the `prompts` module.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub max_tokens: Option<u32>,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Load every table visible to the pipeline. Failure is fatal for the run.
    async fn introspect(&self) -> Result<Vec<Table>>;
}

#[async_trait]
pub trait AccessDirectory: Send + Sync {
    /// Names of the tables the current principal may read.
    async fn approved_tables(&self, tables: &[Table]) -> Result<HashSet<String>>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt, temperature: f32) -> Result<String>;
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// `output[i]` is the embedding of `texts[i]`.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Fast structural SQL parse used before any LLM syntax opinion.
pub trait StructuralParser: Send + Sync {
    fn parse(&self, sql: &str) -> std::result::Result<(), String>;
}

// ---------------------------------------------------------------------------
// Collaborators: explicit handle bundle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SchemaStore>,
    pub directory: Arc<dyn AccessDirectory>,
    /// Produces SQL candidates and explanations.
    pub generator: Arc<dyn TextGenerator>,
    /// Backs the LLM opinion checks; may be a different model than `generator`.
    pub validator: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub parser: Arc<dyn StructuralParser>,
}

impl Collaborators {
    /// Bundle with the same generator for candidates and checks and the
    /// default `sqlparser`-backed structural parser.
    pub fn new(
        store: Arc<dyn SchemaStore>,
        directory: Arc<dyn AccessDirectory>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self {
            store,
            directory,
            validator: generator.clone(),
            generator,
            embedder,
            parser: Arc::new(SqlparserParser),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn TextGenerator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn StructuralParser>) -> Self {
        self.parser = parser;
        self
    }
}

// ---------------------------------------------------------------------------
// Access directories
// ---------------------------------------------------------------------------

/// Pass-through directory for engines without a privilege system (SQLite).
pub struct OpenAccess;

#[async_trait]
impl AccessDirectory for OpenAccess {
    async fn approved_tables(&self, tables: &[Table]) -> Result<HashSet<String>> {
        tracing::info!(tables = tables.len(), "Open access: all tables approved");
        Ok(tables.iter().map(|t| t.name.clone()).collect())
    }
}

/// Fixed allow list.
pub struct StaticAccessDirectory {
    allowed: HashSet<String>,
}

impl StaticAccessDirectory {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AccessDirectory for StaticAccessDirectory {
    async fn approved_tables(&self, tables: &[Table]) -> Result<HashSet<String>> {
        let approved: HashSet<String> = tables
            .iter()
            .filter(|t| self.allowed.contains(&t.name))
            .map(|t| t.name.clone())
            .collect();
        tracing::info!(
            tables = tables.len(),
            approved = approved.len(),
            removed = tables.len() - approved.len(),
            "Static access directory applied"
        );
        Ok(approved)
    }
}

// ---------------------------------------------------------------------------
// Structural parser
// ---------------------------------------------------------------------------

/// `sqlparser` with the generic dialect.
pub struct SqlparserParser;

impl StructuralParser for SqlparserParser {
    fn parse(&self, sql: &str) -> std::result::Result<(), String> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err("Empty or unparsable SQL".to_string());
        }
        let dialect = sqlparser::dialect::GenericDialect {};
        let statements = sqlparser::parser::Parser::parse_sql(&dialect, trimmed)
            .map_err(|e| e.to_string())?;
        if statements.is_empty() {
            return Err("Empty or unparsable SQL".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LlmClient-backed collaborators
// ---------------------------------------------------------------------------

/// Text generator backed by an [`LlmClient`], optionally pinned to a model.
pub struct LlmGenerator {
    client: Arc<LlmClient>,
    model: Option<String>,
}

impl LlmGenerator {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self {
            client,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
impl TextGenerator for LlmGenerator {
    async fn generate(&self, prompt: &Prompt, temperature: f32) -> Result<String> {
        let mut request =
            Request::chat(prompt.system.as_str(), prompt.user.as_str()).with_temperature(temperature);
        request.max_tokens = prompt.max_tokens;
        if let Some(ref model) = self.model {
            request.model = model.clone();
        }
        let response = self.client.complete(&request).await?;
        Ok(response.text.trim().to_string())
    }
}

pub struct LlmEmbedder {
    client: Arc<LlmClient>,
}

impl LlmEmbedder {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EmbeddingService for LlmEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .embed(&EmbeddingRequest::new(texts.to_vec()))
            .await?;
        if response.vectors.len() != texts.len() {
            return Err(QuarryError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.vectors.len()
            )));
        }
        Ok(response.vectors)
    }
}
