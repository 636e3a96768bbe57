use std::env;

use clickhouse::Client;

fn read_env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Client built from `CLICKHOUSE_URL` / `_USER` / `_PASSWORD` / `_DATABASE`.
///
/// Only the URL is required. Each graph's database is selected per query.
pub fn try_get_client() -> Option<Client> {
    let url = read_env_var("CLICKHOUSE_URL")?;
    log::info!("CLICKHOUSE_URL {}", url);

    let mut client = Client::default()
        .with_url(url)
        .with_user(read_env_var("CLICKHOUSE_USER").unwrap_or_else(|| "default".to_string()))
        .with_option("join_use_nulls", "1") // Return NULL for unmatched LEFT JOIN columns
        .with_option("output_format_json_quote_64bit_integers", "0");
    if let Some(password) = read_env_var("CLICKHOUSE_PASSWORD") {
        client = client.with_password(password);
    }
    if let Some(database) = read_env_var("CLICKHOUSE_DATABASE") {
        client = client.with_database(database);
    }
    Some(client)
}
