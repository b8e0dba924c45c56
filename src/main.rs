use rest_scaffold::{Field, ModelSpec};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let models = vec![ModelSpec::new("item", "items")
        .field(Field::named("name"))
        .order_by("name")];

    rest_scaffold::run_server(models).await
}
