use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use ria_layout::{create_dataset, create_store, VersionMarker};
use ria_remote::{RemoteState, RiaRemote, StoreInfo};
use ria_transport::{open_transport, Transport, TransportOptions};
use ria_types::{AddressResolver, ContentKey, ResolvedAddress, RiaUrlResolver};
use serde_json::json;

use crate::cli::*;
use crate::host::FileHost;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = &cli.format;
    match cli.command {
        Command::CreateStore(args) => cmd_create_store(args, format),
        Command::CreateDataset(args) => cmd_create_dataset(args, format),
        Command::Info => with_remote(&cli.config, |r| cmd_info(r, format)),
        Command::Init => with_remote(&cli.config, |r| cmd_init(r, format)),
        Command::Checkpresent(args) => with_remote(&cli.config, |r| cmd_checkpresent(r, args, format)),
        Command::Get(args) => with_remote(&cli.config, |r| cmd_get(r, args, format)),
        Command::Put(args) => with_remote(&cli.config, |r| cmd_put(r, args, format)),
        Command::Remove(args) => with_remote(&cli.config, |r| cmd_remove(r, args, format)),
        Command::Whereis(args) => with_remote(&cli.config, |r| cmd_whereis(r, args, format)),
        Command::Cost => with_remote(&cli.config, |r| cmd_cost(r, format)),
    }
}

fn with_remote(
    config: &Path,
    run: impl FnOnce(&mut RiaRemote<FileHost>) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let host = FileHost::load(config)?;
    let mut remote = RiaRemote::new(host);
    run(&mut remote)
}

fn cmd_init(remote: &mut RiaRemote<FileHost>, format: &OutputFormat) -> anyhow::Result<()> {
    remote.init()?;
    report(format, json!({ "initialized": true }), || {
        println!("{} Remote initialized", "✓".green().bold());
    });
    Ok(())
}

fn cmd_checkpresent(
    remote: &mut RiaRemote<FileHost>,
    args: KeyArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let key = ContentKey::new(args.key);
    let present = remote.checkpresent(&key)?;
    report(format, json!({ "key": key, "present": present }), || {
        if present {
            println!("{} {}", "present".green(), key);
        } else {
            println!("{} {}", "absent".yellow(), key);
        }
    });
    Ok(())
}

fn cmd_get(
    remote: &mut RiaRemote<FileHost>,
    args: TransferArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let key = ContentKey::new(args.key);
    let source = remote.transfer_retrieve(&key, &args.file)?;
    report(
        format,
        json!({ "key": key, "file": args.file, "source": source }),
        || {
            println!(
                "{} {} → {} (from {:?})",
                "✓".green().bold(),
                key,
                args.file.display(),
                source
            );
        },
    );
    Ok(())
}

fn cmd_put(
    remote: &mut RiaRemote<FileHost>,
    args: TransferArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let key = ContentKey::new(args.key);
    remote.transfer_store(&key, &args.file)?;
    report(format, json!({ "key": key, "stored": true }), || {
        println!("{} {} stored", "✓".green().bold(), key);
    });
    Ok(())
}

fn cmd_remove(
    remote: &mut RiaRemote<FileHost>,
    args: KeyArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let key = ContentKey::new(args.key);
    remote.remove(&key)?;
    report(format, json!({ "key": key, "removed": true }), || {
        println!("{} {} removed", "✓".green().bold(), key);
    });
    Ok(())
}

fn cmd_whereis(
    remote: &mut RiaRemote<FileHost>,
    args: KeyArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let key = ContentKey::new(args.key);
    let location = remote.whereis(&key)?;
    report(format, json!({ "key": key, "location": location }), || {
        println!("{location}");
    });
    Ok(())
}

fn cmd_cost(remote: &mut RiaRemote<FileHost>, format: &OutputFormat) -> anyhow::Result<()> {
    let cost = remote.getcost()?;
    let availability = remote.getavailability()?;
    report(
        format,
        json!({ "cost": cost, "availability": availability }),
        || println!("cost {} ({:?})", cost.to_string().bold(), availability),
    );
    Ok(())
}

fn cmd_info(remote: &mut RiaRemote<FileHost>, format: &OutputFormat) -> anyhow::Result<()> {
    remote.prepare()?;
    let Some(info) = remote.store_info() else {
        anyhow::bail!("remote did not become ready");
    };
    let state = remote.state();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info_json(info))?),
        OutputFormat::Text => print_info(info, state),
    }
    Ok(())
}

fn info_json(info: &StoreInfo) -> serde_json::Value {
    json!({
        "store": info.pull.to_url(),
        "push": info.push.as_ref().map(ResolvedAddress::to_url),
        "serving": info.serving.to_url(),
        "dataset_id": info.dataset_id,
        "git_dir": info.locations.git_dir,
        "store_version": info.store_version.as_ref().map(ToString::to_string),
        "object_version": info.object_version.as_ref().map(ToString::to_string),
        "access": info.access(),
        "read_only_reason": info.read_only,
        "logging": info.logging,
        "config": info.config,
    })
}

fn print_info(info: &StoreInfo, state: RemoteState) {
    let version = |marker: &Option<VersionMarker>| {
        marker
            .as_ref()
            .map_or_else(|| "unrecognized".red().to_string(), |m| m.to_string())
    };
    println!("Store:    {}", info.pull.to_url().bold());
    if let Some(push) = &info.push {
        println!("Push:     {}", push.to_url().bold());
    }
    println!("Dataset:  {}", info.dataset_id.cyan());
    println!("Location: {}", info.locations.git_dir.display());
    println!("Versions: store {}, objects {}", version(&info.store_version), version(&info.object_version));
    println!("State:    {state:?}");
    match &info.read_only {
        Some(reason) => println!("Access:   {} ({reason})", "read-only".yellow()),
        None => println!("Access:   {}", "read-write".green()),
    }
    println!(
        "Logging:  {}",
        if info.logging { "enabled" } else { "disabled" }
    );
}

fn connect(url: &str) -> anyhow::Result<(ResolvedAddress, Box<dyn Transport>)> {
    let address = RiaUrlResolver.resolve(url)?;
    let transport = open_transport(&address, &TransportOptions::default())
        .with_context(|| format!("connecting to {address}"))?;
    Ok((address, transport))
}

fn marker(version: &str, no_logging: bool) -> VersionMarker {
    VersionMarker::new(version, if no_logging { "" } else { "l" })
}

fn cmd_create_store(args: CreateStoreArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let (address, mut io) = connect(&args.url)?;
    let store_marker = marker(&args.layout_version, args.no_logging);
    create_store(io.as_mut(), &address.base_path, &store_marker)?;
    io.close()?;
    report(
        format,
        json!({ "store": address.to_url(), "version": store_marker.to_string() }),
        || {
            println!(
                "{} Created store {} (layout {})",
                "✓".green().bold(),
                address.to_url().bold(),
                store_marker
            );
        },
    );
    Ok(())
}

fn cmd_create_dataset(args: CreateDatasetArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let (address, mut io) = connect(&args.url)?;
    let locs = create_dataset(
        io.as_mut(),
        &address.base_path,
        &args.dataset_id,
        &marker(&args.object_version, args.no_logging),
        &marker(&args.store_version, args.no_logging),
        args.alias.as_deref(),
    )?;
    let git_dir = io.describe(&locs.git_dir);
    io.close()?;
    report(
        format,
        json!({ "dataset_id": args.dataset_id, "location": git_dir }),
        || {
            println!(
                "{} Created dataset {} at {}",
                "✓".green().bold(),
                args.dataset_id.cyan(),
                git_dir
            );
        },
    );
    Ok(())
}

fn report(format: &OutputFormat, value: serde_json::Value, text: impl FnOnce()) {
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Text => text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const ID: &str = "8c6ed3c2-5a7f-11ea-9b5e-000c29f04bcc";

    #[test]
    fn administer_and_use_a_store() {
        let dir = TempDir::new().unwrap();
        let url = dir.path().join("store").display().to_string();
        cmd_create_dataset(
            CreateDatasetArgs {
                url: url.clone(),
                dataset_id: ID.into(),
                alias: Some("demo".into()),
                object_version: "2".into(),
                store_version: "1".into(),
                no_logging: false,
            },
            &OutputFormat::Json,
        )
        .unwrap();

        let config = dir.path().join("remote.toml");
        fs::write(
            &config,
            format!("dataset-id = \"{ID}\"\n\n[committed]\nurl = \"{url}\"\n"),
        )
        .unwrap();
        with_remote(&config, |r| cmd_init(r, &OutputFormat::Json)).unwrap();
        assert!(fs::read_to_string(&config).unwrap().contains("archive-id"));

        let src = dir.path().join("src");
        fs::write(&src, b"payload").unwrap();
        let key = "MD5-s7--0123456789abcdef";
        with_remote(&config, |r| {
            cmd_put(
                r,
                TransferArgs {
                    key: key.into(),
                    file: src.clone(),
                },
                &OutputFormat::Text,
            )
        })
        .unwrap();

        let out = dir.path().join("out");
        with_remote(&config, |r| {
            cmd_get(
                r,
                TransferArgs {
                    key: key.into(),
                    file: out.clone(),
                },
                &OutputFormat::Json,
            )
        })
        .unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"payload");
    }

    #[test]
    fn create_store_twice_with_other_version_fails() {
        let dir = TempDir::new().unwrap();
        let url = dir.path().display().to_string();
        let args = |version: &str| CreateStoreArgs {
            url: url.clone(),
            layout_version: version.into(),
            no_logging: true,
        };
        cmd_create_store(args("1"), &OutputFormat::Text).unwrap();
        cmd_create_store(args("1"), &OutputFormat::Text).unwrap();
        assert!(cmd_create_store(args("2"), &OutputFormat::Text).is_err());
        assert_eq!(
            fs::read_to_string(dir.path().join("ria-layout-version")).unwrap(),
            "1|\n"
        );
    }

    #[test]
    fn operations_without_config_fail_cleanly() {
        let dir = TempDir::new().unwrap();
        let err = with_remote(&dir.path().join("absent.toml"), |r| cmd_cost(r, &OutputFormat::Text))
            .unwrap_err();
        assert!(err.to_string().contains("getcost failed"));
    }
}
