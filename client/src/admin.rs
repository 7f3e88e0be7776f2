//! Cluster-wide administrative operations

use crate::cluster::Cluster;
use crate::error::ClientError;
use crate::Result;
use kaflink_protocol::messages::{
    ApiVersionsRequest, ApiVersionsResponse, CreatableTopic, CreatableTopicResult,
    CreateTopicsRequest, DescribeGroupsRequest, DescribedGroup, ListGroupsRequest, ListedGroup,
};
use kaflink_protocol::KafkaErrorCode;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

impl Cluster {
    /// List the groups of every reachable broker.
    ///
    /// Each broker only knows the groups it coordinates, so every broker is
    /// asked in registry order and the answers are merged.
    pub async fn list_groups(&self) -> Result<Vec<ListedGroup>> {
        let mut groups: BTreeMap<String, ListedGroup> = BTreeMap::new();
        let mut answered = false;
        let mut last_error = ClientError::NoBrokersAvailable;

        for broker in self.brokers() {
            match broker.send(&ListGroupsRequest {}).await {
                Ok(response) if response.error_code.is_ok() => {
                    answered = true;
                    for group in response.groups {
                        groups.entry(group.group_id.clone()).or_insert(group);
                    }
                }
                Ok(response) => {
                    warn!("ListGroups on {} failed: {}", broker, response.error_code);
                    last_error = ClientError::broker(response.error_code);
                }
                Err(e) => {
                    warn!("ListGroups on {} failed: {}", broker, e);
                    last_error = e;
                }
            }
        }

        if answered {
            Ok(groups.into_values().collect())
        } else {
            Err(last_error)
        }
    }

    /// Describe groups, asking brokers in turn until each group is answered
    /// by its coordinator.
    ///
    /// Groups no broker could describe are returned with the last error code
    /// seen for them.
    pub async fn describe_groups(&self, group_ids: &[String]) -> Result<Vec<DescribedGroup>> {
        let mut resolved: BTreeMap<String, DescribedGroup> = BTreeMap::new();
        let mut remaining: Vec<String> = group_ids.to_vec();
        let mut answered = false;
        let mut last_error = ClientError::NoBrokersAvailable;

        for broker in self.brokers() {
            if remaining.is_empty() {
                break;
            }

            let request = DescribeGroupsRequest {
                groups: remaining.clone(),
            };
            let response = match broker.send(&request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("DescribeGroups on {} failed: {}", broker, e);
                    last_error = e;
                    continue;
                }
            };
            answered = true;

            // Described groups leave `remaining`, so a later failure never
            // overwrites a successful answer
            for group in response.groups {
                if group.error_code.is_ok() {
                    remaining.retain(|id| id != &group.group_id);
                } else {
                    debug!(
                        "Broker {} could not describe {}: {}",
                        broker, group.group_id, group.error_code
                    );
                }
                resolved.insert(group.group_id.clone(), group);
            }
        }

        if !answered {
            return Err(last_error);
        }

        Ok(group_ids
            .iter()
            .map(|id| {
                resolved.remove(id).unwrap_or_else(|| DescribedGroup {
                    error_code: KafkaErrorCode::CoordinatorNotAvailable,
                    group_id: id.clone(),
                    ..Default::default()
                })
            })
            .collect())
    }

    /// Create topics through the first broker acting as controller
    pub async fn create_topics(
        &self,
        topics: Vec<CreatableTopic>,
        timeout: Duration,
    ) -> Result<Vec<CreatableTopicResult>> {
        let request = CreateTopicsRequest {
            topics,
            timeout_ms: i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX),
        };

        let mut last_error = ClientError::NoBrokersAvailable;
        for broker in self.brokers() {
            match broker.send(&request).await {
                Ok(response)
                    if response
                        .topics
                        .iter()
                        .all(|t| t.error_code == KafkaErrorCode::NotController)
                        && !response.topics.is_empty() =>
                {
                    debug!("Broker {} is not the controller", broker);
                    last_error = ClientError::broker(KafkaErrorCode::NotController);
                }
                Ok(response) => return Ok(response.topics),
                Err(e) => {
                    warn!("CreateTopics on {} failed: {}", broker, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Supported API version ranges of the first broker that answers
    pub async fn api_versions(&self) -> Result<ApiVersionsResponse> {
        let mut last_error = ClientError::NoBrokersAvailable;
        for broker in self.brokers() {
            match broker.send(&ApiVersionsRequest {}).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!("ApiVersions on {} failed: {}", broker, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}
