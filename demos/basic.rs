use sqlstmt::{GeneratedKeys, HttpPipeline, Statement};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("SQLSTMT_PIPELINE_URL")?;
    let token = std::env::var("SQLSTMT_TOKEN")?;

    let mut stmt = Statement::new(HttpPipeline::new_bearer(url, token));

    stmt.execute("CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await?;

    let inserted = stmt
        .execute_update_with_keys(
            "INSERT INTO users (name) VALUES ('Kit')",
            GeneratedKeys::columns(["id"]),
        )
        .await?;
    println!("inserted {inserted} row(s), keys: {:?}", stmt.generated_keys());

    let rows = stmt
        .execute_query("SELECT id, name FROM users WHERE name = 'Kit'")
        .await?;
    for row in rows.iter() {
        println!("{:?} {:?}", row.get_i64("id"), row.get_text("name"));
    }

    for warning in stmt.warnings() {
        eprintln!("warning: {warning}");
    }

    stmt.close().await?;
    stmt.into_protocol().close_stream().await?;
    Ok(())
}
