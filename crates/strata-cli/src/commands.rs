use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use strata_crypto::{SigningKey, SIGNATURE_ALGO};
use strata_node::{BlockManager, NodeConfig, OperationsRegistry};
use strata_rules::{hash_operation, sign_operation, F_ALGO, F_PUBKEY, OP_SIGNUP};
use strata_store::InMemoryLedgerStore;
use strata_types::{codec, Block, OpObject, Operation};

use crate::cli::*;

const SIMULATED_TYPE: &str = "app.note";
const SIMULATED_SERVER: &str = "server";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Keygen(args) => cmd_keygen(args, format),
        Command::Hash(args) => cmd_hash(args, format),
        Command::Sign(args) => cmd_sign(args),
        Command::Config(args) => cmd_config(args),
        Command::Simulate(args) => cmd_simulate(args, format),
    }
}

fn cmd_keygen(args: KeygenArgs, format: OutputFormat) -> anyhow::Result<()> {
    let key = match &args.seed {
        Some(seed) => SigningKey::derive_from_seed(seed.as_bytes()),
        None => SigningKey::generate(),
    };
    let public = key.verifying_key().to_hex();
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "algo": SIGNATURE_ALGO, "private": key.to_hex(), "public": public })
        ),
        OutputFormat::Text => {
            println!("{} {}", "algo:   ".bold(), SIGNATURE_ALGO);
            println!("{} {}", "private:".bold(), key.to_hex().red());
            println!("{} {}", "public: ".bold(), public.cyan());
        }
    }
    Ok(())
}

fn read_operation(path: &Path) -> anyhow::Result<Operation> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    codec::from_json(&text).with_context(|| format!("parsing {}", path.display()))
}

fn cmd_hash(args: HashArgs, format: OutputFormat) -> anyhow::Result<()> {
    let op = read_operation(&args.file)?;
    let computed = hash_operation(&op)?;
    let matches = op.hash == computed;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "computed": computed, "stored": op.hash, "matches": matches })
        ),
        OutputFormat::Text => {
            println!("{}", computed.yellow());
            if op.hash.is_empty() {
                println!("  {}", "no stored hash".dimmed());
            } else if matches {
                println!("  {} stored hash matches", "✓".green().bold());
            } else {
                println!("  {} stored hash differs: {}", "✗".red().bold(), op.hash);
            }
        }
    }
    Ok(())
}

fn cmd_sign(args: SignArgs) -> anyhow::Result<()> {
    let key = match (&args.key, &args.seed) {
        (Some(hex), _) => SigningKey::from_hex(hex).context("invalid private key")?,
        (None, Some(seed)) => SigningKey::derive_from_seed(seed.as_bytes()),
        (None, None) => bail!("either --key or --seed is required"),
    };
    let mut op = read_operation(&args.file)?;
    sign_operation(&mut op, &[(args.name.as_str(), &key)])?;
    let text = serde_json::to_string_pretty(&op)?;

    match &args.output {
        Some(path) => {
            fs::write(path, text + "\n").with_context(|| format!("writing {}", path.display()))?;
            eprintln!(
                "{} signed {} as {}",
                "✓".green().bold(),
                op.hash.yellow(),
                args.name.bold()
            );
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            NodeConfig::from_toml_str(&text).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(NodeConfig::default()),
    }
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.file.as_deref())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

// ---------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------

fn start_node(
    config: &NodeConfig,
    store: &Arc<InMemoryLedgerStore>,
    key: &SigningKey,
) -> anyhow::Result<BlockManager<InMemoryLedgerStore>> {
    let mut registry = OperationsRegistry::with_default_handlers();
    registry.register_object_type(SIMULATED_TYPE, "simulated notes");
    let manager = BlockManager::new(config.clone(), registry, Arc::clone(store))?
        .with_signing_key(key.clone());
    manager.init()?;
    Ok(manager)
}

fn signup(name: &str, key: &SigningKey) -> anyhow::Result<Operation> {
    let identity = OpObject::new([name])
        .with_field(F_PUBKEY, key.verifying_key().to_hex())
        .with_field(F_ALGO, SIGNATURE_ALGO);
    let mut op = Operation::new(OP_SIGNUP).with_new(identity);
    sign_operation(&mut op, &[(name, key)])?;
    Ok(op)
}

fn note(id: &str, key: &SigningKey) -> anyhow::Result<Operation> {
    let mut op = Operation::new(SIMULATED_TYPE).with_new(OpObject::new([id]).with_field("text", id));
    sign_operation(&mut op, &[(SIMULATED_SERVER, key)])?;
    Ok(op)
}

fn layout_label(sizes: &[usize], head: usize) -> String {
    let sealed: Vec<String> = sizes.iter().map(usize::to_string).collect();
    format!("[{}] + {}", sealed.join(" "), head)
}

fn report(block: &Block, manager: &BlockManager<InMemoryLedgerStore>, format: OutputFormat) {
    let (sizes, head) = manager.chain().layout();
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "block_id": block.block_id,
                "hash": block.hash,
                "ops": block.ops.len(),
                "superblocks": sizes,
                "head": head,
            })
        ),
        OutputFormat::Text => println!(
            "block {:>4}  {}  ops {:>3}  {}",
            block.block_id,
            block.short_hash().yellow(),
            block.ops.len(),
            layout_label(&sizes, head).cyan()
        ),
    }
}

fn cmd_simulate(args: SimulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(size) = args.superblock_size {
        config.superblock_size = size;
    }
    config.server_user = SIMULATED_SERVER.to_string();
    config.validate()?;

    let key = SigningKey::derive_from_seed(SIMULATED_SERVER.as_bytes());
    let store = Arc::new(InMemoryLedgerStore::new());
    let manager = start_node(&config, &store, &key)?;

    manager.add_operation(signup(SIMULATED_SERVER, &key)?)?;
    let genesis = manager
        .create_block()?
        .context("genesis block was not produced")?;
    report(&genesis, &manager, format);

    for n in 1..=args.blocks {
        for i in 0..args.ops_per_block {
            manager.add_operation(note(&format!("note-{n}-{i}"), &key)?)?;
        }
        match manager.create_block()? {
            Some(block) => report(&block, &manager, format),
            None => tracing::info!(round = n, "nothing to build"),
        }
    }

    let restarted = start_node(&config, &store, &key)?;
    if restarted.chain().block_hashes() != manager.chain().block_hashes() {
        bail!("reloaded chain differs from the produced chain");
    }
    if format == OutputFormat::Text {
        let (sizes, head) = restarted.chain().layout();
        println!(
            "{} reloaded {} blocks, {} ledger objects, layout {}",
            "✓".green().bold(),
            restarted.chain().len(),
            restarted.ledger_len(),
            layout_label(&sizes, head)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_label_lists_superblocks_then_head() {
        assert_eq!(layout_label(&[], 3), "[] + 3");
        assert_eq!(layout_label(&[12, 4], 1), "[12 4] + 1");
    }

    #[test]
    fn simulation_round_trips_through_reload() {
        let args = SimulateArgs {
            blocks: 6,
            ops_per_block: 2,
            superblock_size: Some(2),
            config: None,
        };
        cmd_simulate(args, OutputFormat::Json).unwrap();
    }

    #[test]
    fn sign_then_hash_agree() {
        let dir = std::env::temp_dir().join(format!("strata-cli-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("op.json");
        let output = dir.join("signed.json");
        let op = Operation::new(SIMULATED_TYPE).with_new(OpObject::new(["n1"]));
        fs::write(&input, serde_json::to_string(&op).unwrap()).unwrap();

        cmd_sign(SignArgs {
            file: input,
            name: "alice".into(),
            key: None,
            seed: Some("alice".into()),
            output: Some(output.clone()),
        })
        .unwrap();

        let signed = read_operation(&output).unwrap();
        assert_eq!(signed.signed_by, ["alice"]);
        assert_eq!(hash_operation(&signed).unwrap(), signed.hash);
        fs::remove_dir_all(&dir).unwrap();
    }
}
