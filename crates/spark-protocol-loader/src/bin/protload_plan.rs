//! 协议装载预检工具：读取装载配置，真实载入其中的协议模块，打印每个端口的候选列表。
//!
//! # 使用方法
//! ```bash
//! cargo run --bin protload_plan -- protocols.toml --module-dir /opt/spark/lib
//! ```
//! - `protocols.toml`：[`LoaderConfig`] 格式的配置；
//! - `--module-dir`：可选，模块搜索目录；未给出时交由系统动态链接器查找。
//!
//! 工具不带内建协议，所有协议都必须来自模块；任一注册失败以非零状态退出。

use std::{env, path::PathBuf, process, sync::Arc};

use anyhow::{Context, bail};
use spark_protocol_loader::{
    DylibLoader, LoaderConfig, ModuleResolver, ProtocolFactory, bootstrap, logging,
};

fn main() {
    if let Err(error) = run() {
        eprintln!("protload_plan: {error:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .context("usage: protload_plan <config.toml> [--module-dir <dir>]")?;

    let mut loader = DylibLoader::new();
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--module-dir" => {
                let dir = args.next().context("--module-dir requires a directory")?;
                loader = loader.with_search_dir(dir);
            }
            unknown => bail!("unknown argument: {unknown}"),
        }
    }

    logging::install("info").context("installing logging")?;

    let config = LoaderConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let resolver = Arc::new(ModuleResolver::new(Arc::new(loader), config.proto_max));
    let factory = ProtocolFactory::without_builtin(resolver.clone());
    let (registry, dispatchers) = bootstrap(&config, factory).context("registering protocols")?;

    for module in resolver.loaded_modules() {
        println!("module {module}");
    }
    for dispatcher in dispatchers.iter() {
        println!("{}", dispatcher.describe(&registry));
    }
    println!(
        "statistics buffer: {} bytes",
        registry.aggregate_statistics(None, false)
    );
    Ok(())
}
