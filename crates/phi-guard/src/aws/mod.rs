//! AWS SDK client initialisation for Secrets Manager and S3.

pub mod clients;

pub use clients::AwsClients;
