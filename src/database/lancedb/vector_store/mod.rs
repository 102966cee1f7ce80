
use super::{ChunkMetadata, EmbeddingRecord};
use crate::{RagError, Result, config::Config};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const TABLE_NAME: &str = "chunks";

/// Vector database store using LanceDB for similarity search
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    vector_dimension: Option<usize>,
}

/// Search result from vector similarity search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: ChunkMetadata,
    /// `1 - distance`, higher is more similar
    pub similarity_score: f32,
    pub distance: f32,
}

/// Records of one source written with the same fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintSpan {
    pub chunk_count: usize,
    pub max_chunk_index: u32,
}

/// What the store holds for one source document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: String,
    pub chunk_count: usize,
    /// Highest stored chunk index
    pub max_chunk_index: u32,
    /// Records grouped by the fingerprint they were written with
    pub fingerprints: BTreeMap<String, FingerprintSpan>,
}

impl SourceSummary {
    /// True when chunks `0..chunk_count` are all stored with `fingerprint`.
    ///
    /// Records past `chunk_count` left by an earlier run do not count against it.
    #[inline]
    pub fn is_current(&self, fingerprint: &str, chunk_count: usize) -> bool {
        self.fingerprints.get(fingerprint).is_some_and(|span| {
            span.chunk_count == chunk_count && span.max_chunk_index as usize + 1 == chunk_count
        })
    }

    /// Shared fingerprint, `None` when records disagree
    #[inline]
    pub fn fingerprint(&self) -> Option<&str> {
        match self.fingerprints.len() {
            1 => self.fingerprints.keys().next().map(String::as_str),
            _ => None,
        }
    }
}

impl VectorStore {
    /// Open the store under the configured data directory
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        Self::open(&config.vector_database_path()).await
    }

    /// Open or create a store at `db_path`
    #[inline]
    pub async fn open(db_path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = db_path.to_string_lossy().into_owned();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        let mut store = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension: None,
        };

        if store.table_exists().await? {
            let dim = store.detect_existing_vector_dimension().await?;
            info!("Detected existing vector dimension: {}", dim);
            store.vector_dimension = Some(dim);
        } else {
            debug!("Chunk table does not exist yet, it is created on first insert");
        }

        Ok(store)
    }

    /// Dimension of the stored vectors, once known
    #[inline]
    pub fn vector_dimension(&self) -> Option<usize> {
        self.vector_dimension
    }

    async fn table_exists(&self) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;
        Ok(table_names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))
    }

    /// Detect vector dimension from existing table schema
    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return usize::try_from(*size).map_err(|_| {
                        RagError::Database(format!("Invalid vector dimension: {}", size))
                    });
                }
            }
        }

        Err(RagError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: usize) -> Result<Arc<Schema>> {
        let list_size = i32::try_from(vector_dim).map_err(|_| {
            RagError::Database(format!("Vector dimension too large: {}", vector_dim))
        })?;

        Ok(Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    list_size,
                ),
                false,
            ),
            Field::new("source", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("page", DataType::UInt32, true),
            Field::new("start_offset", DataType::UInt32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("fingerprint", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ])))
    }

    /// Make sure the table exists with vectors of `vector_dim` dimensions.
    ///
    /// An empty table of another dimension is recreated; a populated one is an error.
    async fn ensure_table(&mut self, vector_dim: usize) -> Result<()> {
        match self.vector_dimension {
            Some(existing) if existing == vector_dim => return Ok(()),
            Some(existing) => {
                let count = self.count_embeddings().await?;
                if count > 0 {
                    return Err(RagError::Database(format!(
                        "Embedding dimension {} does not match the store's dimension {} \
                         ({} records). Run 'doc-rag reset' before switching embedding models.",
                        vector_dim, existing, count
                    )));
                }
                info!(
                    "Vector dimension changed from {} to {} on an empty store, recreating table",
                    existing, vector_dim
                );
                self.drop_table_if_exists().await?;
            }
            None => {}
        }

        let schema = Self::create_schema(vector_dim)?;
        self.connection
            .create_empty_table(&self.table_name, schema)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))?;

        self.vector_dimension = Some(vector_dim);
        info!("Chunk table created with {} dimensions", vector_dim);
        Ok(())
    }

    /// Insert records, replacing any existing record with the same id
    #[inline]
    pub async fn upsert_records(&mut self, records: &[EmbeddingRecord]) -> Result<usize> {
        let Some(first) = records.first() else {
            debug!("No records to store");
            return Ok(0);
        };

        let vector_dim = first.vector.len();
        if vector_dim == 0 {
            return Err(RagError::Database("Cannot store empty vectors".to_string()));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != vector_dim) {
            return Err(RagError::Database(format!(
                "Inconsistent vector dimensions in batch: {} and {}",
                vector_dim,
                bad.vector.len()
            )));
        }

        self.ensure_table(vector_dim).await?;

        let record_batch = Self::create_record_batch(records, vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let table = self.open_table().await?;
        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| RagError::Database(format!("Failed to upsert records: {}", e)))?;

        debug!("Upserted {} records", records.len());
        Ok(records.len())
    }

    /// Create a RecordBatch from embedding records
    fn create_record_batch(records: &[EmbeddingRecord], vector_dim: usize) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut sources = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut pages = Vec::with_capacity(len);
        let mut start_offsets = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut fingerprints = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            sources.push(record.metadata.source.as_str());
            chunk_indices.push(record.metadata.chunk_index);
            pages.push(record.metadata.page);
            start_offsets.push(record.metadata.start_offset);
            contents.push(record.metadata.content.as_str());
            fingerprints.push(record.metadata.fingerprint.as_str());
            created_ats.push(record.metadata.created_at.as_str());
        }

        let schema = Self::create_schema(vector_dim)?;

        let list_size = i32::try_from(vector_dim).map_err(|_| {
            RagError::Database(format!("Vector dimension too large: {}", vector_dim))
        })?;
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            list_size,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(sources)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(UInt32Array::from(pages)),
            Arc::new(UInt32Array::from(start_offsets)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(fingerprints)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Return the `limit` records closest to `query_vector` by cosine distance, nearest first
    #[inline]
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        debug!("Searching for similar vectors with limit: {}", limit);

        let Some(dim) = self.vector_dimension else {
            return Ok(Vec::new());
        };
        if query_vector.len() != dim {
            return Err(RagError::Database(format!(
                "Query vector has {} dimensions but the store holds {}-dimensional vectors",
                query_vector.len(),
                dim
            )));
        }

        let table = self.open_table().await?;
        let results = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?;

        let mut search_results = Vec::new();
        for batch in &batches {
            search_results.extend(Self::parse_search_batch(batch)?);
        }

        search_results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        debug!("Parsed {} search results", search_results.len());
        Ok(search_results)
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
        let sources = string_column(batch, "source")?;
        let chunk_indices = u32_column(batch, "chunk_index")?;
        let pages = u32_column(batch, "page")?;
        let start_offsets = u32_column(batch, "start_offset")?;
        let contents = string_column(batch, "content")?;
        let fingerprints = string_column(batch, "fingerprint")?;
        let created_ats = string_column(batch, "created_at")?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut search_results = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let chunk = ChunkMetadata {
                source: sources.value(row).to_string(),
                chunk_index: chunk_indices.value(row),
                page: (!pages.is_null(row)).then(|| pages.value(row)),
                start_offset: start_offsets.value(row),
                content: contents.value(row).to_string(),
                fingerprint: fingerprints.value(row).to_string(),
                created_at: created_ats.value(row).to_string(),
            };

            let distance =
                distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            search_results.push(SearchResult {
                chunk,
                similarity_score: 1.0 - distance,
                distance,
            });
        }

        Ok(search_results)
    }

    /// Summarize stored records per source, sorted by source
    #[inline]
    pub async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        if self.vector_dimension.is_none() {
            return Ok(Vec::new());
        }

        let table = self.open_table().await?;
        let stream = table
            .query()
            .select(Select::columns(&["source", "chunk_index", "fingerprint"]))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to query sources: {}", e)))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read source stream: {}", e)))?;

        let mut summaries: BTreeMap<String, SourceSummary> = BTreeMap::new();
        for batch in &batches {
            let sources = string_column(batch, "source")?;
            let chunk_indices = u32_column(batch, "chunk_index")?;
            let fingerprints = string_column(batch, "fingerprint")?;

            for row in 0..batch.num_rows() {
                let source = sources.value(row);
                let fingerprint = fingerprints.value(row);
                let chunk_index = chunk_indices.value(row);

                let summary = summaries
                    .entry(source.to_string())
                    .or_insert_with(|| SourceSummary {
                        source: source.to_string(),
                        chunk_count: 0,
                        max_chunk_index: chunk_index,
                        fingerprints: BTreeMap::new(),
                    });

                summary.chunk_count += 1;
                summary.max_chunk_index = summary.max_chunk_index.max(chunk_index);

                let span = summary
                    .fingerprints
                    .entry(fingerprint.to_string())
                    .or_insert(FingerprintSpan {
                        chunk_count: 0,
                        max_chunk_index: chunk_index,
                    });
                span.chunk_count += 1;
                span.max_chunk_index = span.max_chunk_index.max(chunk_index);
            }
        }

        debug!("Store holds records for {} sources", summaries.len());
        Ok(summaries.into_values().collect())
    }

    /// Delete every record of `source`, returning how many were removed
    #[inline]
    pub async fn delete_source(&mut self, source: &str) -> Result<usize> {
        if self.vector_dimension.is_none() {
            return Ok(0);
        }

        debug!("Deleting records for source: {}", source);
        let table = self.open_table().await?;
        let predicate = format!("source = '{}'", escape_literal(source));

        let count = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| RagError::Database(format!("Failed to count source records: {}", e)))?;

        if count > 0 {
            table
                .delete(&predicate)
                .await
                .map_err(|e| RagError::Database(format!("Failed to delete source: {}", e)))?;
            info!("Deleted {} records for source: {}", count, source);
        }

        Ok(count)
    }

    /// Get the total number of records stored
    #[inline]
    pub async fn count_embeddings(&self) -> Result<usize> {
        if self.vector_dimension.is_none() {
            return Ok(0);
        }

        let table = self.open_table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))
    }

    /// Compact data files and prune old versions
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        if self.vector_dimension.is_none() {
            return Ok(());
        }

        debug!("Optimizing vector database");
        let table = self.open_table().await?;
        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| RagError::Database(format!("Failed to optimize table: {}", e)))?;

        info!("Vector database optimization completed");
        Ok(())
    }

    /// Drop all stored records
    #[inline]
    pub async fn reset(&mut self) -> Result<()> {
        self.drop_table_if_exists().await?;
        self.vector_dimension = None;
        info!("Vector store reset");
        Ok(())
    }

    async fn drop_table_if_exists(&self) -> Result<()> {
        if self.table_exists().await? {
            info!("Dropping existing chunk table");
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| RagError::Database(format!("Failed to drop table: {}", e)))?;
        } else {
            warn!("No chunk table to drop");
        }

        Ok(())
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

/// Quote a value for a SQL string literal
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}
