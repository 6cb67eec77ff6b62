// ==========================================
// 并发导入测试
// ==========================================
// 测试目标: 同一 file_id 至多一个执行在进行；不同文件互不干扰
// ==========================================


use fleet_import::api::{ExecuteRequest, ValidateRequest};
use fleet_import::logging;
use fleet_import::{ErrorType, ImportType};
use futures::future::join_all;
use std::time::Instant;
use test_helpers::*;

fn fleet_rows(prefix: &str, count: usize) -> Vec<Vec<Cell>> {
    (0..count)
        .map(|i| {
            let id = format!("{}{:03}", prefix, i);
            row![id.as_str(), 2015 + (i % 8) as i32, "Blue Bird", "Vision"]
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_execute_same_file_runs_once() {
    logging::init_test();
    let env = TestEnv::new();

    let analysis = env
        .analyze(ImportType::Vehicle, "fleet.xlsx", vehicle_workbook(fleet_rows("BUS", 200)))
        .await;

    let attempts = (0..4).map(|_| {
        let api = env.api.clone();
        let file_id = analysis.file_id.clone();
        async move {
            api.execute(ExecuteRequest {
                import_type: ImportType::Vehicle,
                file_id,
                mappings: vehicle_mapping(),
                skip_duplicates: false,
                update_existing: false,
                deadline_ms: None,
            })
            .await
        }
    });
    let results = join_all(attempts).await;

    let committed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].imported, 200);

    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        let kind = err.error_type();
        assert!(
            kind == ErrorType::Busy || kind == ErrorType::InvalidState,
            "unexpected error: {:?}",
            err
        );
    }

    assert_eq!(env.count_rows("vehicles"), 200);
    assert_eq!(env.count_by_import("vehicles", &committed[0].import_id), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_validate_is_read_only() {
    logging::init_test();
    let env = TestEnv::new();

    let analysis = env
        .analyze(ImportType::Vehicle, "fleet.xlsx", vehicle_workbook(fleet_rows("VAN", 50)))
        .await;

    let attempts = (0..6).map(|_| {
        let api = env.api.clone();
        let file_id = analysis.file_id.clone();
        async move {
            api.validate(ValidateRequest {
                import_type: ImportType::Vehicle,
                file_id,
                mappings: vehicle_mapping(),
                allow_partial: false,
            })
            .await
        }
    });

    for result in join_all(attempts).await {
        let validation = result.expect("validate should succeed");
        assert_eq!(validation.total_records, 50);
        assert_eq!(validation.valid_records, 50);
    }
    assert_eq!(env.count_rows("vehicles"), 0);
    assert_eq!(env.staged_file_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_imports_of_different_files() {
    logging::init_test();
    let env = TestEnv::new();

    let mut file_ids = Vec::new();
    for prefix in ["A", "B", "C"] {
        let analysis = env
            .analyze(ImportType::Vehicle, "fleet.xlsx", vehicle_workbook(fleet_rows(prefix, 100)))
            .await;
        file_ids.push(analysis.file_id);
    }

    let start = Instant::now();
    let attempts = file_ids.iter().map(|file_id| {
        let api = env.api.clone();
        let file_id = file_id.clone();
        async move {
            api.execute(ExecuteRequest {
                import_type: ImportType::Vehicle,
                file_id,
                mappings: vehicle_mapping(),
                skip_duplicates: false,
                update_existing: false,
                deadline_ms: None,
            })
            .await
        }
    });
    let results = join_all(attempts).await;
    tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "并发导入完成");

    for result in results {
        let result = result.expect("execute should succeed");
        assert!(result.committed());
        assert_eq!(result.imported, 100);
    }
    assert_eq!(env.count_rows("vehicles"), 300);
    assert_eq!(env.staged_file_count(), 0);
}
