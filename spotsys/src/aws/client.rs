use aws_config::profile::ProfileFileCredentialsProvider;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::Client as Ec2Client;
use aws_types::SdkConfig;
use log::debug;
use url::Url;

/// Builds SDK config for the given region.  Credentials come from the named profile if one is
/// given, otherwise from the SDK's default provider chain (environment, profile, IMDS...).
pub(crate) async fn build_client_config(region: &Region, profile: Option<&str>) -> SdkConfig {
    let loader = aws_config::from_env().region(region.clone());
    let loader = match profile {
        Some(profile) => {
            debug!("Using AWS profile '{}'", profile);
            loader.credentials_provider(
                ProfileFileCredentialsProvider::builder()
                    .profile_name(profile)
                    .build(),
            )
        }
        None => loader,
    };
    loader.load().await
}

/// Builds an EC2 client from the given SDK config, sending requests to `endpoint` instead of the
/// regional EC2 endpoint if one is given.
pub(crate) fn build_ec2_client(config: &SdkConfig, endpoint: Option<&Url>) -> Ec2Client {
    match endpoint {
        Some(endpoint) => {
            debug!("Using custom EC2 endpoint {}", endpoint);
            let ec2_config = aws_sdk_ec2::config::Builder::from(config)
                .endpoint_url(endpoint.as_str())
                .build();
            Ec2Client::from_conf(ec2_config)
        }
        None => Ec2Client::new(config),
    }
}
