//! End-to-end import scenarios
//!
//! Each test submits through the orchestrator and waits for the detached run
//! to reach a terminal state, using in-memory collaborators from `common`.

use roster_common::types::{JobKind, JobStatus, TargetCollection};
use roster_server::ingest::{
    ImportConfig, ImportError, JobStore, SubmitImport, TargetEntity, WebhookNotifier,
};
use rust_xlsxwriter::Workbook;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{provider_csv, MemorySink, RecordingStore, TestHarness};

const REGISTRY_HEADER: &str = "NPI,Entity Type Code,Provider Organization Name (Legal Business Name),\
Provider Last Name (Legal Name),Provider First Name,Provider Credential Text,\
Provider Business Practice Location Address State Name,\
Provider Business Practice Location Address Postal Code,\
Healthcare Provider Taxonomy Code_1,Healthcare Provider Taxonomy Code_2";

fn upload(key: &str, target: TargetCollection) -> SubmitImport {
    SubmitImport {
        kind: JobKind::GenericUpload,
        source_ref: key.to_string(),
        target,
        notify_address: None,
    }
}

fn registry(url: String) -> SubmitImport {
    SubmitImport {
        kind: JobKind::RegistryImport,
        source_ref: url,
        target: TargetCollection::Providers,
        notify_address: None,
    }
}

/// Sheet with a blank leading row and a blank row between records
fn provider_workbook() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    sheet.write_string(0, 0, "   ").unwrap();
    for (col, name) in ["first_name", "last_name", "state", "postal_code"].iter().enumerate() {
        sheet.write_string(1, col as u16, *name).unwrap();
    }

    sheet.write_string(2, 0, "Ana").unwrap();
    sheet.write_string(2, 1, "Rivera").unwrap();
    sheet.write_string(2, 2, "TX").unwrap();
    sheet.write_number(2, 3, 78701.0).unwrap();

    sheet.write_string(4, 2, "WA").unwrap();

    sheet.write_string(5, 0, "Li").unwrap();
    sheet.write_string(5, 1, "Chen").unwrap();
    sheet.write_string(5, 2, "WA").unwrap();
    sheet.write_number(5, 3, 98102.0).unwrap();

    workbook.save_to_buffer().unwrap()
}

fn registry_csv() -> String {
    [
        REGISTRY_HEADER,
        "1234567893,1,,Rivera,Ana,LCSW,wa,981011234,1041C0700X,",
        "1234567894,1,,Chen,Li,MD,WA,98102,207Q00000X,",
        "12345,1,,Ng,Kim,,WA,98103,,103T00000X",
        "1234567895,2,Harbor Behavioral Health,,,,WA,98104,261QM0801X,",
    ]
    .join("\n")
}

#[tokio::test]
async fn test_upload_with_missing_names_reports_rows() {
    let harness = TestHarness::new();
    let mut csv = String::from("first_name,last_name,state\n");
    for i in 1..=10 {
        if i == 3 || i == 7 {
            csv.push_str(",,WA\n");
        } else {
            csv.push_str(&format!("Given{},Family{},WA\n", i, i));
        }
    }
    harness.fetcher.put("uploads/people.csv", csv);

    let id = harness
        .orchestrator
        .submit(upload("uploads/people.csv", TargetCollection::Providers))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.percent, 100);
    assert!(job.completed_at.is_some());

    let result = job.result.unwrap();
    assert_eq!(result.total_rows, 10);
    assert_eq!(result.successful_rows, 8);
    assert_eq!(result.failed_rows, 2);
    assert_eq!(result.duplicate_rows, 0);

    // Header is row 1, so data rows 3 and 7 sit on rows 4 and 8
    let rows: Vec<u64> = result.errors.iter().map(|e| e.row_number).collect();
    assert_eq!(rows, vec![4, 8]);
    assert!(result.errors.iter().all(|e| e.field == "name"));
    assert_eq!(harness.sink.written().len(), 8);
}

#[tokio::test]
async fn test_workbook_upload_uses_sheet_row_numbers() {
    let harness = TestHarness::new();
    harness.fetcher.put("uploads/people.xlsx", provider_workbook());

    let id = harness
        .orchestrator
        .submit(upload("uploads/people.xlsx", TargetCollection::Providers))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_detail);
    assert_eq!(job.progress.percent, 100);

    let result = job.result.unwrap();
    assert_eq!(result.total_rows, 3);
    assert_eq!(result.successful_rows, 2);
    assert_eq!(result.failed_rows, 1);

    // Header sits on sheet row 2; the nameless record is on row 5
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].row_number, 5);
    assert_eq!(result.errors[0].field, "name");

    let written = harness.sink.written();
    assert_eq!(written.len(), 2);
    let TargetEntity::Provider(first) = &written[0] else {
        panic!("expected a provider");
    };
    assert_eq!(first.display_name, "Ana Rivera");
    assert_eq!(first.state.as_deref(), Some("TX"));
    assert_eq!(first.postal_code.as_deref(), Some("78701"));
}

#[tokio::test]
async fn test_failed_batch_counts_whole_batch_and_job_completes() {
    let mut config = ImportConfig::without_pauses();
    config.object_batch_size = 500;
    let harness = TestHarness::builder()
        .config(config)
        .sink(MemorySink::failing_batches([2]))
        .build();
    harness.fetcher.put("uploads/big.csv", provider_csv(2000));

    let id = harness
        .orchestrator
        .submit(upload("uploads/big.csv", TargetCollection::Providers))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result.total_rows, 2000);
    assert_eq!(result.successful_rows, 1500);
    assert_eq!(result.failed_rows, 500);
    assert_eq!(harness.sink.batch_count(), 4);
    assert_eq!(harness.sink.written().len(), 1500);
}

#[tokio::test]
async fn test_duplicates_are_counted_not_written() {
    let harness = TestHarness::new();
    harness.fetcher.put(
        "uploads/dupes.csv",
        "first_name,last_name,npi\n\
         Ana,Rivera,1234567893\n\
         Ana,Rivera,1234567893\n\
         Ana B.,Rivera,1234567893\n\
         Li,Chen,\n\
         li,CHEN,\n",
    );

    let id = harness
        .orchestrator
        .submit(upload("uploads/dupes.csv", TargetCollection::Providers))
        .await
        .unwrap();
    let result = harness.wait_for_terminal(id).await.result.unwrap();

    assert_eq!(result.total_rows, 5);
    assert_eq!(result.successful_rows, 2);
    assert_eq!(result.duplicate_rows, 3);
    assert_eq!(result.failed_rows, 0);
}

#[tokio::test]
async fn test_organization_upload_infers_category() {
    let harness = TestHarness::new();
    harness.fetcher.put(
        "uploads/orgs.csv",
        "Business Name,City,State,Zip\n\
         Northside Urgent Care,Tacoma,WA,98402\n\
         Eastlake Dental Group,Seattle,wa,98102-4411\n\
         Bad State Clinic,Spokane,Washington,99201\n",
    );

    let id = harness
        .orchestrator
        .submit(upload("uploads/orgs.csv", TargetCollection::Organizations))
        .await
        .unwrap();
    let result = harness.wait_for_terminal(id).await.result.unwrap();

    assert_eq!(result.successful_rows, 2);
    assert_eq!(result.failed_rows, 1);
    assert_eq!(result.errors[0].field, "state");
    assert_eq!(result.errors[0].row_number, 4);

    let written = harness.sink.written();
    let TargetEntity::Organization(dental) = &written[1] else {
        panic!("expected an organization, got {:?}", written[1]);
    };
    assert_eq!(dental.category.as_deref(), Some("Dental"));
    assert_eq!(dental.state.as_deref(), Some("WA"));
    assert_eq!(dental.postal_code.as_deref(), Some("98102"));
}

#[tokio::test]
async fn test_missing_required_column_fails_job() {
    let harness = TestHarness::new();
    harness
        .fetcher
        .put("uploads/wrong.csv", "city,state\nSeattle,WA\n");

    let id = harness
        .orchestrator
        .submit(upload("uploads/wrong.csv", TargetCollection::Providers))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_detail.unwrap().contains("missing required columns"));
    assert!(job.result.is_none());
    assert!(harness.sink.written().is_empty());
}

#[tokio::test]
async fn test_missing_object_fails_job() {
    let harness = TestHarness::new();

    let id = harness
        .orchestrator
        .submit(upload("uploads/nowhere.csv", TargetCollection::Providers))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_detail.unwrap().contains("uploads/nowhere.csv"));
}

#[tokio::test]
async fn test_panicking_run_is_failed_with_partial_result() {
    let mut config = ImportConfig::without_pauses();
    config.object_batch_size = 10;
    let harness = TestHarness::builder()
        .config(config)
        .sink(MemorySink::panicking_batch(2))
        .build();
    harness.fetcher.put("uploads/boom.csv", provider_csv(50));

    let id = harness
        .orchestrator
        .submit(upload("uploads/boom.csv", TargetCollection::Providers))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_detail.unwrap().contains("panicked"));

    let partial = job.result.expect("partial result");
    assert_eq!(partial.total_rows, 20);
    assert_eq!(partial.successful_rows, 10);
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let store = Arc::new(RecordingStore::default());
    let mut config = ImportConfig::without_pauses();
    config.object_batch_size = 50;
    let harness = TestHarness::builder()
        .store(Arc::clone(&store) as Arc<dyn JobStore>)
        .config(config)
        .build();
    harness.fetcher.put("uploads/steady.csv", provider_csv(400));

    let id = harness
        .orchestrator
        .submit(upload("uploads/steady.csv", TargetCollection::Providers))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let percents = store.percents();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert!(percents.iter().all(|p| *p <= 99));
    assert_eq!(job.progress.percent, 100);
}

#[tokio::test]
async fn test_registry_import_filters_and_classifies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nppes.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(registry_csv()))
        .mount(&server)
        .await;

    let harness = TestHarness::new();
    let id = harness
        .orchestrator
        .submit(registry(format!("{}/nppes.csv", server.uri())))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result.total_rows, 4);
    assert_eq!(result.successful_rows, 2);
    assert_eq!(result.failed_rows, 1);
    assert_eq!(result.duplicate_rows, 0);
    assert!(result.counted_rows() <= result.total_rows);
    assert_eq!(result.errors[0].row_number, 4);
    assert_eq!(result.errors[0].field, "NPI");

    let written = harness.sink.written();
    let TargetEntity::Provider(person) = &written[0] else {
        panic!("expected a provider");
    };
    assert_eq!(person.display_name, "Ana Rivera, LCSW");
    assert_eq!(person.specialty.as_deref(), Some("Clinical Social Worker"));
    assert_eq!(person.state.as_deref(), Some("WA"));
    assert_eq!(person.postal_code.as_deref(), Some("98101"));

    let TargetEntity::Provider(practice) = &written[1] else {
        panic!("expected a provider");
    };
    assert_eq!(practice.display_name, "Harbor Behavioral Health");
    assert_eq!(practice.category.as_deref(), Some("Behavioral Health"));
}

#[tokio::test]
async fn test_registry_state_outside_two_letters_rejects_only_that_row() {
    let csv = [
        REGISTRY_HEADER,
        "1234567893,1,,Rivera,Ana,LCSW,WA,98101,1041C0700X,",
        "1234567894,1,,Tremblay,Luc,MD,ONTARIO,,2084P0800X,",
        "1234567895,1,,Okafor,Ada,PhD,OR,97201,103T00000X,",
    ]
    .join("\n");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nppes.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(csv))
        .mount(&server)
        .await;

    let harness = TestHarness::new();
    let id = harness
        .orchestrator
        .submit(registry(format!("{}/nppes.csv", server.uri())))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result.total_rows, 3);
    assert_eq!(result.successful_rows, 2);
    assert_eq!(result.failed_rows, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].row_number, 3);
    assert_eq!(result.errors[0].field, "state");
    assert_eq!(result.errors[0].raw_value, "ONTARIO");

    // Both valid rows share the one batch and reach the sink
    let written = harness.sink.written();
    assert_eq!(written.len(), 2);
    assert!(written.iter().all(|entity| matches!(
        entity,
        TargetEntity::Provider(p) if p.state.as_deref().map_or(false, |s| s.len() == 2)
    )));
}

#[tokio::test]
async fn test_registry_source_unavailable_fails_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let harness = TestHarness::new();
    let id = harness
        .orchestrator
        .submit(registry(format!("{}/nppes.csv", server.uri())))
        .await
        .unwrap();
    let job = harness.wait_for_terminal(id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let detail = job.error_detail.unwrap();
    assert!(detail.starts_with("Source unavailable: "), "{}", detail);
    assert!(detail.contains("503"), "{}", detail);
    assert!(job.result.is_none());
}

#[tokio::test]
async fn test_second_registry_import_conflicts_while_first_runs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nppes.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(registry_csv())
                .set_delay(Duration::from_millis(750)),
        )
        .mount(&server)
        .await;

    let harness = TestHarness::new();
    let url = format!("{}/nppes.csv", server.uri());
    let first = harness.orchestrator.submit(registry(url.clone())).await.unwrap();

    let err = harness
        .orchestrator
        .submit(registry(url.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Conflict(JobKind::RegistryImport)));

    let jobs = harness
        .orchestrator
        .list(Some(JobKind::RegistryImport), 10)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, first);

    // Uploads are not exclusive and run alongside
    harness.fetcher.put("uploads/side.csv", provider_csv(3));
    assert!(harness
        .orchestrator
        .submit(upload("uploads/side.csv", TargetCollection::Providers))
        .await
        .is_ok());

    harness.wait_for_terminal(first).await;
    let next = harness.orchestrator.submit(registry(url)).await.unwrap();
    assert_eq!(
        harness.wait_for_terminal(next).await.status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_completion_notification_is_posted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/imports"))
        .and(body_partial_json(serde_json::json!({
            "address": "ops@example.org",
            "status": "completed",
            "resultSummary": { "totalRows": 3, "successfulRows": 3 }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(format!("{}/hooks/imports", server.uri())).unwrap();
    let harness = TestHarness::builder().notifier(Arc::new(notifier)).build();
    harness.fetcher.put("uploads/small.csv", provider_csv(3));

    let mut request = upload("uploads/small.csv", TargetCollection::Providers);
    request.notify_address = Some("ops@example.org".to_string());
    let id = harness.orchestrator.submit(request).await.unwrap();
    harness.wait_for_terminal(id).await;

    // Delivery runs on its own task after the terminal write
    for _ in 0..100 {
        if !server.received_requests().await.unwrap_or_default().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    server.verify().await;
}

#[tokio::test]
async fn test_recover_interrupted_fails_leftover_jobs() {
    let harness = TestHarness::new();
    let leftover = roster_common::types::ImportJob::pending(
        JobKind::RegistryImport,
        "",
        TargetCollection::Providers,
        None,
    );
    harness.store.create(&leftover).await.unwrap();
    harness.store.mark_running(leftover.id).await.unwrap();

    assert_eq!(harness.orchestrator.recover_interrupted().await.unwrap(), 1);

    let job = harness.orchestrator.status(leftover.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_detail.as_deref(),
        Some(roster_server::ingest::orchestrator::INTERRUPTED_DETAIL)
    );
}
