pub mod firehose;
pub mod payment;
pub mod scene;
pub mod stream;
