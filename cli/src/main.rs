use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use kaflink::protocol::messages::{CreatableTopic, EARLIEST_OFFSET, LATEST_OFFSET};
use kaflink::{
    follow_partition, ClientConfig, Cluster, ConsumerBuilder, ConsumerEvents, ConsumerRecord,
    FetchConfig, ProduceRecord, ProducerBuilder, RequestAcknowledgement, TopicPartition,
};
use serde::Serialize;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kaflink")]
#[command(about = "Talk to a Kafka-compatible cluster")]
struct Args {
    /// Bootstrap brokers, comma separated (overrides KAFLINK_BROKERS)
    #[arg(short, long, value_delimiter = ',')]
    brokers: Option<Vec<String>>,

    /// Client id sent with every request (overrides KAFLINK_CLIENT_ID)
    #[arg(long)]
    client_id: Option<String>,

    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send values to a topic; reads stdin lines when no value is given
    Produce {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        partition: Option<i32>,
        #[arg(short, long)]
        key: Option<String>,
        #[arg(long, value_enum, default_value_t = Acks::None)]
        acks: Acks,
        values: Vec<String>,
    },
    /// Consume as a member of a group
    Consume {
        #[arg(short, long, required = true)]
        topic: Vec<String>,
        #[arg(short, long)]
        group: String,
        /// Offset for partitions the group never committed
        #[arg(long, default_value_t = 0)]
        default_offset: i64,
        #[arg(short = 'n', long)]
        max_messages: Option<usize>,
    },
    /// Tail one partition without joining a group
    Follow {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long, default_value_t = 0)]
        partition: i32,
        /// `earliest`, `latest` or an offset
        #[arg(short, long, default_value = "earliest")]
        offset: String,
        #[arg(short = 'n', long)]
        max_messages: Option<usize>,
    },
    #[command(subcommand)]
    Groups(GroupsCommand),
    #[command(subcommand)]
    Topics(TopicsCommand),
    /// Show the API versions supported by the first reachable broker
    ApiVersions,
}

#[derive(Subcommand, Debug)]
enum GroupsCommand {
    List,
    Describe { groups: Vec<String> },
}

#[derive(Subcommand, Debug)]
enum TopicsCommand {
    List,
    Create {
        name: String,
        #[arg(long, default_value_t = 1)]
        partitions: i32,
        #[arg(long, default_value_t = 1)]
        replication_factor: i16,
        /// Topic config as key=value, repeatable
        #[arg(long = "config", value_parser = parse_config_pair)]
        configs: Vec<(String, String)>,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Acks {
    None,
    Leader,
    All,
}

impl From<Acks> for RequestAcknowledgement {
    fn from(acks: Acks) -> Self {
        match acks {
            Acks::None => RequestAcknowledgement::NoResponse,
            Acks::Leader => RequestAcknowledgement::Leader,
            Acks::All => RequestAcknowledgement::AllReplicas,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartOffset {
    Earliest,
    Latest,
    At(i64),
}

fn parse_offset(value: &str) -> Result<StartOffset> {
    match value {
        "earliest" => Ok(StartOffset::Earliest),
        "latest" => Ok(StartOffset::Latest),
        other => match other.parse::<i64>() {
            Ok(offset) if offset >= 0 => Ok(StartOffset::At(offset)),
            _ => bail!("offset must be 'earliest', 'latest' or a non-negative number, got '{other}'"),
        },
    }
}

fn parse_config_pair(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{value}'"))
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            warn!("Invalid log level '{}', defaulting to 'warn'", level);
            tracing::Level::WARN
        }
    }
}

#[derive(Serialize)]
struct RecordView {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<String>,
    value: Option<String>,
}

impl From<&ConsumerRecord> for RecordView {
    fn from(record: &ConsumerRecord) -> Self {
        let text = |b: &Bytes| String::from_utf8_lossy(b).into_owned();
        Self {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: record.key.as_ref().map(text),
            value: record.value.as_ref().map(text),
        }
    }
}

struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, line: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
        } else {
            println!("{}", line());
        }
        Ok(())
    }

    fn record(&self, record: &ConsumerRecord) -> Result<()> {
        let view = RecordView::from(record);
        self.emit(&view, || {
            format!(
                "{}/{} @{} {}{}",
                view.topic,
                view.partition,
                view.offset,
                view.key.as_deref().map(|k| format!("{k}: ")).unwrap_or_default(),
                view.value.as_deref().unwrap_or("<null>")
            )
        })
    }
}

fn client_config(args: &Args) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_env().context("reading KAFLINK_* environment")?;
    if let Some(brokers) = &args.brokers {
        config.brokers = brokers.clone();
    }
    if let Some(client_id) = &args.client_id {
        config.client_id = client_id.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = client_config(&args)?;
    let out = Output { json: args.json };
    info!("Using brokers {:?} as {}", config.brokers, config.client_id);

    match args.command {
        Command::Produce {
            topic,
            partition,
            key,
            acks,
            values,
        } => produce(config, &out, topic, partition, key, acks, values).await,
        Command::Consume {
            topic,
            group,
            default_offset,
            max_messages,
        } => consume(config, &out, topic, group, default_offset, max_messages).await,
        Command::Follow {
            topic,
            partition,
            offset,
            max_messages,
        } => follow(config, &out, topic, partition, &offset, max_messages).await,
        Command::Groups(command) => groups(config, &out, command).await,
        Command::Topics(command) => topics(config, &out, command).await,
        Command::ApiVersions => api_versions(config, &out).await,
    }
}

async fn produce(
    config: ClientConfig,
    out: &Output,
    topic: String,
    partition: Option<i32>,
    key: Option<String>,
    acks: Acks,
    values: Vec<String>,
) -> Result<()> {
    let values = if values.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .context("reading values from stdin")?
    } else {
        values
    };

    let producer = ProducerBuilder::new()
        .client_config(config)
        .acks(acks.into())
        .build()?;

    let records = values
        .into_iter()
        .map(|value| {
            let record = match &key {
                Some(key) => ProduceRecord::with_key(topic.clone(), key.clone(), value),
                None => ProduceRecord::new(topic.clone(), value),
            };
            match partition {
                Some(partition) => record.partition(partition),
                None => record,
            }
        })
        .collect();

    for sent in producer.send_batch(records).await? {
        #[derive(Serialize)]
        struct Sent<'a> {
            topic: &'a str,
            partition: i32,
            offset: Option<i64>,
        }
        out.emit(
            &Sent {
                topic: &sent.topic,
                partition: sent.partition,
                offset: sent.offset,
            },
            || match sent.offset {
                Some(offset) => format!("{}/{} @{}", sent.topic, sent.partition, offset),
                None => format!("{}/{} (unacknowledged)", sent.topic, sent.partition),
            },
        )?;
    }

    producer.close().await?;
    Ok(())
}

async fn consume(
    config: ClientConfig,
    out: &Output,
    topics: Vec<String>,
    group: String,
    default_offset: i64,
    max_messages: Option<usize>,
) -> Result<()> {
    let (consumer, mut records) = ConsumerBuilder::new()
        .client_config(config)
        .group_id(group)
        .topics(topics)
        .default_offset(default_offset)
        .on_assignment(|partitions: &[TopicPartition]| {
            info!("Assigned {} partition(s)", partitions.len())
        })
        .stream()?;

    let mut seen = 0;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            record = records.next() => match record {
                Some(record) => {
                    out.record(&record)?;
                    seen += 1;
                    if max_messages.is_some_and(|max| seen >= max) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    consumer.shutdown().await?;
    Ok(())
}

async fn follow(
    config: ClientConfig,
    out: &Output,
    topic: String,
    partition: i32,
    offset: &str,
    max_messages: Option<usize>,
) -> Result<()> {
    let cluster = Arc::new(Cluster::from_config(config)?);
    let start = match parse_offset(offset)? {
        StartOffset::Earliest => cluster.list_offsets(&topic, partition, EARLIEST_OFFSET).await?,
        StartOffset::Latest => cluster.list_offsets(&topic, partition, LATEST_OFFSET).await?,
        StartOffset::At(offset) => offset,
    };
    info!("Following {}/{} from {}", topic, partition, start);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let events = ConsumerEvents {
        on_message: Some(Arc::new(move |record: &ConsumerRecord| {
            let _ = tx.send(record.clone());
        })),
        on_failure: Some(Arc::new(|partition: &TopicPartition, e: &kaflink::ClientError| {
            error!("Following {} failed: {}", partition, e)
        })),
        ..Default::default()
    };
    let follower = follow_partition(
        cluster.clone(),
        TopicPartition::new(topic, partition),
        start,
        FetchConfig::default(),
        Arc::new(events),
    );

    let mut seen = 0;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            record = rx.recv() => match record {
                Some(record) => {
                    out.record(&record)?;
                    seen += 1;
                    if max_messages.is_some_and(|max| seen >= max) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    follower.abort();
    cluster.close().await;
    Ok(())
}

async fn groups(config: ClientConfig, out: &Output, command: GroupsCommand) -> Result<()> {
    let cluster = Cluster::from_config(config)?;
    match command {
        GroupsCommand::List => {
            for group in cluster.list_groups().await? {
                out.emit(
                    &serde_json::json!({
                        "group_id": group.group_id,
                        "protocol_type": group.protocol_type,
                    }),
                    || format!("{} ({})", group.group_id, group.protocol_type),
                )?;
            }
        }
        GroupsCommand::Describe { groups } => {
            if groups.is_empty() {
                bail!("name at least one group to describe");
            }
            for group in cluster.describe_groups(&groups).await? {
                let members: Vec<&str> =
                    group.members.iter().map(|m| m.member_id.as_str()).collect();
                out.emit(
                    &serde_json::json!({
                        "group_id": group.group_id,
                        "error": group.error_code.as_i16(),
                        "state": group.state,
                        "protocol": group.protocol,
                        "members": members,
                    }),
                    || {
                        if group.error_code.is_ok() {
                            format!(
                                "{} {} {} members={:?}",
                                group.group_id, group.state, group.protocol, members
                            )
                        } else {
                            format!("{} error: {}", group.group_id, group.error_code)
                        }
                    },
                )?;
            }
        }
    }
    cluster.close().await;
    Ok(())
}

async fn topics(config: ClientConfig, out: &Output, command: TopicsCommand) -> Result<()> {
    let cluster = Cluster::from_config(config)?;
    match command {
        TopicsCommand::List => {
            let metadata = cluster.metadata(&[]).await?;
            for topic in &metadata.topics {
                let leaders: Vec<(i32, i32)> = topic
                    .partitions
                    .iter()
                    .map(|p| (p.partition_id, p.leader))
                    .collect();
                out.emit(
                    &serde_json::json!({
                        "topic": topic.name,
                        "error": topic.error_code.as_i16(),
                        "partitions": leaders,
                    }),
                    || format!("{} partitions={} leaders={:?}", topic.name, leaders.len(), leaders),
                )?;
            }
        }
        TopicsCommand::Create {
            name,
            partitions,
            replication_factor,
            configs,
            timeout_secs,
        } => {
            let topic = configs.into_iter().fold(
                CreatableTopic::new(name, partitions, replication_factor),
                |topic, (key, value)| topic.with_config(key, value),
            );
            for result in cluster
                .create_topics(vec![topic], Duration::from_secs(timeout_secs))
                .await?
            {
                out.emit(
                    &serde_json::json!({
                        "topic": result.name,
                        "error": result.error_code.as_i16(),
                    }),
                    || format!("{}: {}", result.name, result.error_code),
                )?;
            }
        }
    }
    cluster.close().await;
    Ok(())
}

async fn api_versions(config: ClientConfig, out: &Output) -> Result<()> {
    let cluster = Cluster::from_config(config)?;
    let versions = cluster.api_versions().await?;
    for range in &versions.api_keys {
        out.emit(
            &serde_json::json!({
                "api_key": range.api_key,
                "min_version": range.min_version,
                "max_version": range.max_version,
            }),
            || format!("{:>3}: v{}..=v{}", range.api_key, range.min_version, range.max_version),
        )?;
    }
    cluster.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("earliest").unwrap(), StartOffset::Earliest);
        assert_eq!(parse_offset("latest").unwrap(), StartOffset::Latest);
        assert_eq!(parse_offset("42").unwrap(), StartOffset::At(42));
        assert!(parse_offset("-3").is_err());
        assert!(parse_offset("soon").is_err());
    }

    #[test]
    fn test_parse_config_pair() {
        assert_eq!(
            parse_config_pair("retention.ms=1000").unwrap(),
            ("retention.ms".to_string(), "1000".to_string())
        );
        assert!(parse_config_pair("=x").is_err());
        assert!(parse_config_pair("novalue").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "kaflink",
            "--brokers",
            "a:9092,b:9092",
            "produce",
            "--topic",
            "events",
            "--acks",
            "leader",
            "hello",
        ])
        .unwrap();
        assert_eq!(
            args.brokers,
            Some(vec!["a:9092".to_string(), "b:9092".to_string()])
        );
        match args.command {
            Command::Produce {
                topic,
                acks,
                values,
                ..
            } => {
                assert_eq!(topic, "events");
                assert_eq!(RequestAcknowledgement::from(acks), RequestAcknowledgement::Leader);
                assert_eq!(values, vec!["hello"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_record_view_is_lossy_text() {
        let record = ConsumerRecord {
            topic: "t".to_string(),
            partition: 0,
            offset: 5,
            key: Some(Bytes::from_static(b"k")),
            value: None,
            timestamp: None,
        };
        let json = serde_json::to_value(RecordView::from(&record)).unwrap();
        assert_eq!(json["key"], "k");
        assert!(json["value"].is_null());
    }
}
