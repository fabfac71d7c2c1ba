use crate::error::AppError;
use crate::faq::similarity::distance_to_score;
use arrow::array::{
    Array, BooleanBuilder, FixedSizeListBuilder, Float32Array, Float32Builder, RecordBatch,
    RecordBatchIterator, StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// The two searchable collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// Student queries.
    Queries,
    /// FAQ stubs.
    Faq,
}

impl Collection {
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Queries => "query_vectors",
            Collection::Faq => "faq_vectors",
        }
    }
}

/// An id returned by the index together with its match score in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub score: f32,
}

/// Nearest-neighbour search over embeddings, scoped by course.
#[async_trait]
pub trait VectorIndex: Send + Sync + 'static {
    /// Inserts or replaces the vector stored under `id`.
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        course_id: &str,
        vector: &[f32],
        answered: bool,
    ) -> Result<(), AppError>;

    /// Up to `limit` nearest answered ids within `course_id`, best first.
    async fn search(
        &self,
        collection: Collection,
        course_id: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, AppError>;
}

/// LanceDB-backed index, one table per collection with columns `id`, `course_id`,
/// `answered`, `vector`.
pub struct LanceVectorIndex {
    conn: Connection,
    write_lock: Mutex<()>,
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn schema_for(dimension: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("course_id", DataType::Utf8, false),
        Field::new("answered", DataType::Boolean, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension,
            ),
            true,
        ),
    ]))
}

impl LanceVectorIndex {
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        let uri = path.to_str().ok_or_else(|| {
            AppError::Config(format!("Vector index path is not valid UTF-8: {:?}", path))
        })?;
        let conn = connect(uri).execute().await?;
        info!("Connected to LanceDB at {:?}", path);
        Ok(Self {
            conn,
            write_lock: Mutex::new(()),
        })
    }

    async fn open_table(&self, collection: Collection) -> Result<Option<Table>, AppError> {
        let name = collection.table_name();
        let exists = self
            .conn
            .table_names()
            .execute()
            .await?
            .iter()
            .any(|t| t == name);
        if !exists {
            return Ok(None);
        }
        Ok(Some(self.conn.open_table(name).execute().await?))
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        course_id: &str,
        vector: &[f32],
        answered: bool,
    ) -> Result<(), AppError> {
        if vector.is_empty() {
            return Err(AppError::VectorIndex("Refusing to index an empty vector".to_string()));
        }
        let dimension = i32::try_from(vector.len())
            .map_err(|_| AppError::VectorIndex("Vector too large".to_string()))?;
        let schema = schema_for(dimension);

        let mut id_builder = StringBuilder::new();
        let mut course_builder = StringBuilder::new();
        let mut answered_builder = BooleanBuilder::new();
        let mut vector_builder =
            FixedSizeListBuilder::new(Float32Builder::with_capacity(vector.len()), dimension);

        id_builder.append_value(id);
        course_builder.append_value(course_id);
        answered_builder.append_value(answered);
        vector_builder.values().append_slice(vector);
        vector_builder.append(true);

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(id_builder.finish()),
                Arc::new(course_builder.finish()),
                Arc::new(answered_builder.finish()),
                Arc::new(vector_builder.finish()),
            ],
        )?;
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let _guard = self.write_lock.lock().await;
        match self.open_table(collection).await? {
            Some(table) => {
                table.delete(&format!("id = {}", quote(id))).await?;
                table.add(Box::new(reader)).execute().await?;
            }
            None => {
                self.conn
                    .create_table(collection.table_name(), Box::new(reader))
                    .execute()
                    .await?;
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: Collection,
        course_id: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, AppError> {
        let Some(table) = self.open_table(collection).await? else {
            return Ok(Vec::new());
        };

        let mut results = table
            .query()
            .nearest_to(vector.to_vec())?
            .distance_type(DistanceType::Cosine)
            .only_if(format!("course_id = {} AND answered = true", quote(course_id)))
            .limit(limit)
            .execute()
            .await?;

        let mut hits = Vec::new();
        while let Some(batch) = results.try_next().await? {
            let ids = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| AppError::VectorIndex("Column 'id' not found".to_string()))?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| AppError::VectorIndex("Column '_distance' not found".to_string()))?;

            for i in 0..ids.len() {
                if ids.is_null(i) || distances.is_null(i) {
                    continue;
                }
                hits.push(IndexHit {
                    id: ids.value(i).to_string(),
                    score: distance_to_score(distances.value(i)),
                });
            }
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }
}
