// ==========================================
// 校车车队管理系统 - 命令行导入工具
// ==========================================
// 用法: fleet-import <type> <file.xlsx> [--db PATH] [--skip-duplicates]
//                    [--update-existing] [--partial] [--dry-run]
// 流程: analyze → validate → execute（使用推荐映射），逐步输出 JSON
// ==========================================

use anyhow::{anyhow, bail, Context};
use fleet_import::api::{AnalyzeRequest, ExecuteRequest, ValidateRequest};
use fleet_import::app::{get_default_db_path, AppState};
use fleet_import::{logging, ImportType, Mapping};
use std::path::PathBuf;

const USAGE: &str = "usage: fleet-import <mileage|ecse|student|vehicle> <file.xlsx> \
[--db PATH] [--skip-duplicates] [--update-existing] [--partial] [--dry-run]";

#[derive(Debug)]
struct CliArgs {
    import_type: ImportType,
    file: PathBuf,
    db_path: Option<String>,
    skip_duplicates: bool,
    update_existing: bool,
    partial: bool,
    dry_run: bool,
}

impl CliArgs {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut positional = Vec::new();
        let mut parsed = CliArgs {
            import_type: ImportType::Vehicle,
            file: PathBuf::new(),
            db_path: None,
            skip_duplicates: false,
            update_existing: false,
            partial: false,
            dry_run: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    parsed.db_path = Some(args.next().ok_or_else(|| anyhow!("--db needs a path"))?)
                }
                "--skip-duplicates" => parsed.skip_duplicates = true,
                "--update-existing" => parsed.update_existing = true,
                "--partial" => parsed.partial = true,
                "--dry-run" => parsed.dry_run = true,
                "-h" | "--help" => bail!(USAGE),
                flag if flag.starts_with("--") => bail!("unknown option {}\n{}", flag, USAGE),
                _ => positional.push(arg),
            }
        }

        if positional.len() != 2 {
            bail!(USAGE);
        }
        parsed.import_type = positional[0]
            .parse::<ImportType>()
            .map_err(|e| anyhow!("{}\n{}", e, USAGE))?;
        parsed.file = PathBuf::from(&positional[1]);
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args = CliArgs::parse(std::env::args().skip(1))?;
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("cannot read {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let db_path = args.db_path.clone().unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);
    let state = AppState::new(&db_path).await.map_err(anyhow::Error::msg)?;
    let api = state.import_api.clone();

    // 1. 分析
    let analysis = api
        .analyze(AnalyzeRequest {
            import_type: args.import_type,
            file_name,
            content_type: None,
            bytes,
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);

    // 2. 校验（推荐映射）
    let mappings = Mapping::from(analysis.suggested_mappings.clone());
    let validation = api
        .validate(ValidateRequest {
            import_type: args.import_type,
            file_id: analysis.file_id.clone(),
            mappings: mappings.clone(),
            allow_partial: args.partial,
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&validation)?);

    if args.dry_run {
        tracing::info!("dry-run: 跳过执行");
        state.shutdown();
        return Ok(());
    }

    // 3. 执行
    let result = api
        .execute(ExecuteRequest {
            import_type: args.import_type,
            file_id: analysis.file_id,
            mappings,
            skip_duplicates: args.skip_duplicates,
            update_existing: args.update_existing,
            deadline_ms: None,
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    state.shutdown();
    if !result.committed() {
        bail!("{}", result.summary);
    }
    Ok(())
}
