use sqlstmt::{HttpPipeline, Statement, UpdateCount};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut stmt = Statement::new(HttpPipeline::from_env().map_err(anyhow::Error::msg)?);

    stmt.add_batch(
        "CREATE TABLE IF NOT EXISTS batch_users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    )?;
    stmt.add_batch("INSERT INTO batch_users (name) VALUES ('Alice')")?;
    stmt.add_batch(
        "INSERT INTO batch_users (name) VALUES ('Bob'); \
         DELETE FROM batch_users WHERE name = 'Nobody'",
    )?;

    for (index, count) in stmt.execute_batch().await?.into_iter().enumerate() {
        match count {
            UpdateCount::Rows(rows) => println!("statement {index}: {rows} row(s)"),
            UpdateCount::SuccessNoInfo => println!("statement {index}: ok, no count"),
        }
    }

    // Several statements in one text also run as a single round trip.
    let first_is_rows = stmt
        .execute("SELECT COUNT(*) AS n FROM batch_users; DELETE FROM batch_users")
        .await?;
    if first_is_rows {
        let total = stmt
            .result_set()
            .and_then(|rows| rows.row(0))
            .and_then(|row| row.get_i64("n"));
        println!("rows before cleanup: {total:?}");
    }
    stmt.more_results();
    println!("deleted: {:?}", stmt.update_count());

    stmt.close().await?;
    Ok(())
}
