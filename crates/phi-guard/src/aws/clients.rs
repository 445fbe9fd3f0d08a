//! AWS SDK client bundle.

use aws_config::BehaviorVersion;

/// Secrets Manager and S3 clients built from one shared
/// [`aws_config::SdkConfig`], so credentials are resolved once.
#[derive(Clone, Debug)]
pub struct AwsClients {
    /// Resolves the data key secrets.
    pub secretsmanager: aws_sdk_secretsmanager::Client,
    /// Writes durable audit objects.
    pub s3: aws_sdk_s3::Client,
}

impl AwsClients {
    /// Load the standard credential chain and region, then build each client.
    ///
    /// `endpoint_url` overrides the endpoint of every client; S3 then uses
    /// path-style addressing, which LocalStack and MinIO expect.
    pub async fn init(endpoint_url: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;

        let secretsmanager = aws_sdk_secretsmanager::Client::new(&config);
        let s3 = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::config::Builder::from(&config)
                .force_path_style(endpoint_url.is_some())
                .build(),
        );

        Self { secretsmanager, s3 }
    }
}
