use crate::store::DbPool;
use anyhow::Result;

pub async fn health_check(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
