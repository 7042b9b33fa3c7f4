use lambda_runtime::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    fbo_lambda_gateway::run().await
}
