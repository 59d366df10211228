//! Streaming multipart form reader with rollback on failure.

use crate::error::ApiError;
use async_trait::async_trait;
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use futures::future::BoxFuture;

/// Compensating action undoing a visited part.
pub type Rollback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// One named file part, streamed.
pub struct FormPart<'a> {
    /// Form field name from `Content-Disposition`.
    pub name: String,
    pub file_name: String,
    /// Part body; yields `Bytes` chunks.
    pub body: Field<'a>,
}

/// Receives each named file part.
#[async_trait]
pub trait FormPartVisitor: Send {
    /// Consume `part` and return how to undo it.
    ///
    /// On error the visitor cleans up anything it left half done for
    /// this part; earlier parts are rolled back by [`read_form`].
    async fn visit(&mut self, part: FormPart<'_>) -> Result<Rollback, ApiError>;
}

/// Feed every named file part of `multipart` to `visitor`.
///
/// Parts without a form name or without a filename are skipped. If a later part or the body
/// itself fails, the rollbacks of all accepted parts run in the order they
/// were registered before the error is returned. Returns the number of
/// parts visited.
pub async fn read_form<V>(multipart: &mut Multipart, visitor: &mut V) -> Result<usize, ApiError>
where
    V: FormPartVisitor + ?Sized,
{
    let mut rollbacks: Vec<Rollback> = Vec::new();
    match visit_parts(multipart, visitor, &mut rollbacks).await {
        Ok(()) => Ok(rollbacks.len()),
        Err(e) => {
            if !rollbacks.is_empty() {
                tracing::warn!(
                    parts = rollbacks.len(),
                    error = %e,
                    "Multipart form failed, rolling back accepted parts"
                );
            }
            for rollback in rollbacks {
                rollback().await;
            }
            Err(e)
        }
    }
}

async fn visit_parts<V>(
    multipart: &mut Multipart,
    visitor: &mut V,
    rollbacks: &mut Vec<Rollback>,
) -> Result<(), ApiError>
where
    V: FormPartVisitor + ?Sized,
{
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Multipart(e.body_text()))?
    {
        let Some(name) = field.name().filter(|n| !n.is_empty()).map(str::to_string) else {
            continue;
        };
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let rollback = visitor
            .visit(FormPart {
                name,
                file_name,
                body: field,
            })
            .await?;
        rollbacks.push(rollback);
    }
    Ok(())
}
