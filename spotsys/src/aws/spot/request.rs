//! Typed `RequestSpotInstances` parameters and the EC2 call that submits them.
//!
//! Field names follow the EC2 API so templates written for other AWS tooling can be used as-is.
//! Unknown fields are rejected rather than dropped, so a misspelled parameter fails here instead
//! of silently launching something other than what was asked for.

use async_trait::async_trait;
use aws_sdk_ec2::primitives::DateTime;
use aws_sdk_ec2::types::{
    BlockDeviceMapping as Ec2BlockDeviceMapping, EbsBlockDevice as Ec2EbsBlockDevice,
    IamInstanceProfileSpecification, InstanceInterruptionBehavior, InstanceIpv6Address,
    InstanceNetworkInterfaceSpecification, InstanceType, Ipv4PrefixSpecificationRequest,
    Ipv6PrefixSpecificationRequest, PrivateIpAddressSpecification, RequestSpotLaunchSpecification,
    ResourceType, RunInstancesMonitoringEnabled, SpotInstanceRequest, SpotInstanceType,
    SpotPlacement, Tag as Ec2Tag, TagSpecification as Ec2TagSpecification, Tenancy, VolumeType,
};
use aws_sdk_ec2::Client as Ec2Client;
use aws_smithy_types::date_time::Format;
use log::{debug, trace, warn};
use serde::Deserialize;
use snafu::ResultExt;

/// Parameters for a single `RequestSpotInstances` call
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct SpotRequest {
    pub(crate) availability_zone_group: Option<String>,
    pub(crate) block_duration_minutes: Option<i32>,
    pub(crate) client_token: Option<String>,
    pub(crate) dry_run: Option<bool>,
    pub(crate) instance_count: Option<i32>,
    pub(crate) instance_interruption_behavior: Option<String>,
    pub(crate) launch_group: Option<String>,
    pub(crate) launch_specification: Option<LaunchSpecification>,
    pub(crate) spot_price: Option<String>,
    pub(crate) tag_specifications: Option<Vec<TagSpecification>>,
    #[serde(rename = "Type")]
    pub(crate) request_type: Option<String>,
    /// RFC 3339
    pub(crate) valid_from: Option<String>,
    /// RFC 3339
    pub(crate) valid_until: Option<String>,
}

/// Describes the instance to launch
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct LaunchSpecification {
    pub(crate) addressing_type: Option<String>,
    pub(crate) block_device_mappings: Option<Vec<BlockDeviceMapping>>,
    pub(crate) ebs_optimized: Option<bool>,
    pub(crate) iam_instance_profile: Option<IamInstanceProfile>,
    pub(crate) image_id: Option<String>,
    pub(crate) instance_type: Option<String>,
    pub(crate) kernel_id: Option<String>,
    pub(crate) key_name: Option<String>,
    pub(crate) monitoring: Option<Monitoring>,
    pub(crate) network_interfaces: Option<Vec<NetworkInterface>>,
    pub(crate) placement: Option<Placement>,
    pub(crate) ramdisk_id: Option<String>,
    pub(crate) security_group_ids: Option<Vec<String>>,
    pub(crate) security_groups: Option<Vec<String>>,
    pub(crate) subnet_id: Option<String>,
    /// Base64, as EC2 expects it
    pub(crate) user_data: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct BlockDeviceMapping {
    pub(crate) device_name: Option<String>,
    pub(crate) ebs: Option<EbsBlockDevice>,
    pub(crate) no_device: Option<String>,
    pub(crate) virtual_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct EbsBlockDevice {
    pub(crate) delete_on_termination: Option<bool>,
    pub(crate) encrypted: Option<bool>,
    pub(crate) iops: Option<i32>,
    pub(crate) kms_key_id: Option<String>,
    pub(crate) outpost_arn: Option<String>,
    pub(crate) snapshot_id: Option<String>,
    pub(crate) throughput: Option<i32>,
    pub(crate) volume_size: Option<i32>,
    pub(crate) volume_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct IamInstanceProfile {
    pub(crate) arn: Option<String>,
    pub(crate) name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct Monitoring {
    pub(crate) enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct NetworkInterface {
    pub(crate) associate_carrier_ip_address: Option<bool>,
    pub(crate) associate_public_ip_address: Option<bool>,
    pub(crate) delete_on_termination: Option<bool>,
    pub(crate) description: Option<String>,
    pub(crate) device_index: Option<i32>,
    pub(crate) groups: Option<Vec<String>>,
    /// e.g. "efa" or "interface"
    pub(crate) interface_type: Option<String>,
    pub(crate) ipv4_prefix_count: Option<i32>,
    pub(crate) ipv4_prefixes: Option<Vec<Ipv4Prefix>>,
    pub(crate) ipv6_address_count: Option<i32>,
    pub(crate) ipv6_addresses: Option<Vec<Ipv6Address>>,
    pub(crate) ipv6_prefix_count: Option<i32>,
    pub(crate) ipv6_prefixes: Option<Vec<Ipv6Prefix>>,
    pub(crate) network_card_index: Option<i32>,
    pub(crate) network_interface_id: Option<String>,
    pub(crate) private_ip_address: Option<String>,
    pub(crate) private_ip_addresses: Option<Vec<PrivateIpAddress>>,
    pub(crate) secondary_private_ip_address_count: Option<i32>,
    pub(crate) subnet_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct Ipv4Prefix {
    pub(crate) ipv4_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct Ipv6Address {
    pub(crate) ipv6_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct Ipv6Prefix {
    pub(crate) ipv6_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct PrivateIpAddress {
    pub(crate) primary: Option<bool>,
    pub(crate) private_ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct Placement {
    pub(crate) availability_zone: Option<String>,
    pub(crate) group_name: Option<String>,
    pub(crate) tenancy: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct TagSpecification {
    pub(crate) resource_type: Option<String>,
    pub(crate) tags: Option<Vec<Tag>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub(crate) struct Tag {
    pub(crate) key: Option<String>,
    pub(crate) value: Option<String>,
}

impl From<LaunchSpecification> for RequestSpotLaunchSpecification {
    fn from(spec: LaunchSpecification) -> Self {
        RequestSpotLaunchSpecification::builder()
            .set_addressing_type(spec.addressing_type)
            .set_block_device_mappings(
                spec.block_device_mappings
                    .map(|mappings| mappings.into_iter().map(Into::into).collect()),
            )
            .set_ebs_optimized(spec.ebs_optimized)
            .set_iam_instance_profile(spec.iam_instance_profile.map(|profile| {
                IamInstanceProfileSpecification::builder()
                    .set_arn(profile.arn)
                    .set_name(profile.name)
                    .build()
            }))
            .set_image_id(spec.image_id)
            .set_instance_type(spec.instance_type.as_deref().map(InstanceType::from))
            .set_kernel_id(spec.kernel_id)
            .set_key_name(spec.key_name)
            .set_monitoring(spec.monitoring.map(|monitoring| {
                RunInstancesMonitoringEnabled::builder()
                    .set_enabled(monitoring.enabled)
                    .build()
            }))
            .set_network_interfaces(
                spec.network_interfaces
                    .map(|interfaces| interfaces.into_iter().map(Into::into).collect()),
            )
            .set_placement(spec.placement.map(|placement| {
                SpotPlacement::builder()
                    .set_availability_zone(placement.availability_zone)
                    .set_group_name(placement.group_name)
                    .set_tenancy(placement.tenancy.as_deref().map(Tenancy::from))
                    .build()
            }))
            .set_ramdisk_id(spec.ramdisk_id)
            .set_security_group_ids(spec.security_group_ids)
            .set_security_groups(spec.security_groups)
            .set_subnet_id(spec.subnet_id)
            .set_user_data(spec.user_data)
            .build()
    }
}

impl From<BlockDeviceMapping> for Ec2BlockDeviceMapping {
    fn from(mapping: BlockDeviceMapping) -> Self {
        Ec2BlockDeviceMapping::builder()
            .set_device_name(mapping.device_name)
            .set_ebs(mapping.ebs.map(|ebs| {
                Ec2EbsBlockDevice::builder()
                    .set_delete_on_termination(ebs.delete_on_termination)
                    .set_encrypted(ebs.encrypted)
                    .set_iops(ebs.iops)
                    .set_kms_key_id(ebs.kms_key_id)
                    .set_outpost_arn(ebs.outpost_arn)
                    .set_snapshot_id(ebs.snapshot_id)
                    .set_throughput(ebs.throughput)
                    .set_volume_size(ebs.volume_size)
                    .set_volume_type(ebs.volume_type.as_deref().map(VolumeType::from))
                    .build()
            }))
            .set_no_device(mapping.no_device)
            .set_virtual_name(mapping.virtual_name)
            .build()
    }
}

impl From<NetworkInterface> for InstanceNetworkInterfaceSpecification {
    fn from(interface: NetworkInterface) -> Self {
        InstanceNetworkInterfaceSpecification::builder()
            .set_associate_carrier_ip_address(interface.associate_carrier_ip_address)
            .set_associate_public_ip_address(interface.associate_public_ip_address)
            .set_delete_on_termination(interface.delete_on_termination)
            .set_description(interface.description)
            .set_device_index(interface.device_index)
            .set_groups(interface.groups)
            .set_interface_type(interface.interface_type)
            .set_ipv4_prefix_count(interface.ipv4_prefix_count)
            .set_ipv4_prefixes(interface.ipv4_prefixes.map(|prefixes| {
                prefixes
                    .into_iter()
                    .map(|prefix| {
                        Ipv4PrefixSpecificationRequest::builder()
                            .set_ipv4_prefix(prefix.ipv4_prefix)
                            .build()
                    })
                    .collect()
            }))
            .set_ipv6_address_count(interface.ipv6_address_count)
            .set_ipv6_addresses(interface.ipv6_addresses.map(|addresses| {
                addresses
                    .into_iter()
                    .map(|address| {
                        InstanceIpv6Address::builder()
                            .set_ipv6_address(address.ipv6_address)
                            .build()
                    })
                    .collect()
            }))
            .set_ipv6_prefix_count(interface.ipv6_prefix_count)
            .set_ipv6_prefixes(interface.ipv6_prefixes.map(|prefixes| {
                prefixes
                    .into_iter()
                    .map(|prefix| {
                        Ipv6PrefixSpecificationRequest::builder()
                            .set_ipv6_prefix(prefix.ipv6_prefix)
                            .build()
                    })
                    .collect()
            }))
            .set_network_card_index(interface.network_card_index)
            .set_network_interface_id(interface.network_interface_id)
            .set_private_ip_address(interface.private_ip_address)
            .set_private_ip_addresses(interface.private_ip_addresses.map(|addresses| {
                addresses
                    .into_iter()
                    .map(|address| {
                        PrivateIpAddressSpecification::builder()
                            .set_primary(address.primary)
                            .set_private_ip_address(address.private_ip_address)
                            .build()
                    })
                    .collect()
            }))
            .set_secondary_private_ip_address_count(interface.secondary_private_ip_address_count)
            .set_subnet_id(interface.subnet_id)
            .build()
    }
}

impl From<TagSpecification> for Ec2TagSpecification {
    fn from(spec: TagSpecification) -> Self {
        Ec2TagSpecification::builder()
            .set_resource_type(spec.resource_type.as_deref().map(ResourceType::from))
            .set_tags(spec.tags.map(|tags| {
                tags.into_iter()
                    .map(|tag| Ec2Tag::builder().set_key(tag.key).set_value(tag.value).build())
                    .collect()
            }))
            .build()
    }
}

/// Parses an optional RFC 3339 timestamp from the named request field.
fn parse_time(field: &'static str, value: Option<&str>) -> Result<Option<DateTime>> {
    value
        .map(|value| {
            DateTime::from_str(value, Format::DateTime)
                .context(error::InvalidTimestampSnafu { field, value })
        })
        .transpose()
}

/// Collects the request IDs from a `RequestSpotInstances` response, in the order EC2 listed them.
/// The first request is the one reported, so it must have an ID; later requests without one are
/// logged and skipped.
fn request_ids(region: &str, spot_requests: Vec<SpotInstanceRequest>) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(spot_requests.len());
    for (index, spot_request) in spot_requests.into_iter().enumerate() {
        trace!(
            "Spot request {:?} is in state {:?}",
            spot_request.spot_instance_request_id,
            spot_request.state
        );
        match spot_request.spot_instance_request_id {
            Some(id) => ids.push(id),
            None if index == 0 => return error::MissingRequestIdSnafu { region }.fail(),
            None => warn!(
                "Spot request {} in {} has no request ID: {:?}",
                index, region, spot_request.status
            ),
        }
    }
    Ok(ids)
}

/// Something that can place spot instance requests.  EC2 is the real one; tests stand in their
/// own so the launch flow can run without making billable requests.
#[async_trait]
pub(crate) trait SpotRequester {
    /// The region requests are placed in
    fn region(&self) -> &str;

    /// Submits the request and returns the IDs of the spot instance requests that were created,
    /// in the order EC2 listed them.
    async fn request_spot_instances(&self, request: SpotRequest) -> Result<Vec<String>>;
}

/// Places spot requests through the EC2 API.
pub(crate) struct Ec2SpotRequester {
    client: Ec2Client,
    region: String,
}

impl Ec2SpotRequester {
    pub(crate) fn new(client: Ec2Client, region: &str) -> Self {
        Self {
            client,
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl SpotRequester for Ec2SpotRequester {
    fn region(&self) -> &str {
        &self.region
    }

    async fn request_spot_instances(&self, request: SpotRequest) -> Result<Vec<String>> {
        let valid_from = parse_time("ValidFrom", request.valid_from.as_deref())?;
        let valid_until = parse_time("ValidUntil", request.valid_until.as_deref())?;
        trace!("Spot request parameters: {:?}", request);

        debug!("Making request spot instances call in {}", self.region);
        let response = self
            .client
            .request_spot_instances()
            .set_availability_zone_group(request.availability_zone_group)
            .set_block_duration_minutes(request.block_duration_minutes)
            .set_client_token(request.client_token)
            .set_dry_run(request.dry_run)
            .set_instance_count(request.instance_count)
            .set_instance_interruption_behavior(
                request
                    .instance_interruption_behavior
                    .as_deref()
                    .map(InstanceInterruptionBehavior::from),
            )
            .set_launch_group(request.launch_group)
            .set_launch_specification(request.launch_specification.map(Into::into))
            .set_spot_price(request.spot_price)
            .set_tag_specifications(
                request
                    .tag_specifications
                    .map(|specs| specs.into_iter().map(Into::into).collect()),
            )
            .set_type(request.request_type.as_deref().map(SpotInstanceType::from))
            .set_valid_from(valid_from)
            .set_valid_until(valid_until)
            .send()
            .await
            .context(error::RequestSpotInstancesSnafu {
                region: &self.region,
            })?;

        request_ids(&self.region, response.spot_instance_requests.unwrap_or_default())
    }
}

mod error {
    use aws_sdk_ec2::error::SdkError;
    use aws_sdk_ec2::operation::request_spot_instances::RequestSpotInstancesError;
    use aws_smithy_types::date_time::DateTimeParseError;
    use aws_smithy_types::error::display::DisplayErrorContext;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    #[allow(clippy::large_enum_variant)]
    pub(crate) enum Error {
        #[snafu(display(
            "Invalid {} '{}', expected an RFC 3339 timestamp: {}",
            field,
            value,
            source
        ))]
        InvalidTimestamp {
            field: String,
            value: String,
            source: DateTimeParseError,
        },

        #[snafu(display("First spot request in {} response has no request ID", region))]
        MissingRequestId { region: String },

        #[snafu(display(
            "Failed to request spot instances in {}: {}",
            region,
            DisplayErrorContext(source)
        ))]
        RequestSpotInstances {
            region: String,
            source: SdkError<RequestSpotInstancesError>,
        },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;
