use super::*;

use crate::internal;
use crate::partition::Region;
use crate::query::{self, QueryBuilder, QueryContext};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tempfile::TempDir;

//-----------------------------------------------------------------------------

// Fields drop in order, so the executor stops before the directory is removed.
struct Fixture {
    executor: QueryExecutor,
    context: QueryContext,
    _dir: TempDir,
}

fn fixture(params: ExecutorParams) -> Fixture {
    let (dir, filename) = internal::populated_store();
    let store = internal::open_store(&filename);
    let families = store.load_families().unwrap();
    let context = store.sqlite_context();
    drop(store);

    let pool = ConnectionPool::open(&filename, params.pool_size);
    assert!(pool.is_ok(), "Failed to open the pool: {}", pool.unwrap_err());
    let executor = QueryExecutor::new(pool.unwrap(), Arc::new(families), params);
    Fixture { executor, context, _dir: dir }
}

fn run_query(fixture: &Fixture, query: CompiledQuery) -> (Vec<VariantResult>, Vec<QueryError>) {
    let handle = fixture.executor.submit(query);
    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for item in handle {
        match item {
            Ok(row) => rows.push(row),
            Err(err) => errors.push(err),
        }
    }
    (rows, errors)
}

fn rows(fixture: &Fixture, builder: QueryBuilder) -> Vec<VariantResult> {
    let query = builder.build();
    assert!(query.is_ok(), "Failed to compile the query: {}", query.unwrap_err());
    let (rows, errors) = run_query(fixture, query.unwrap());
    assert!(errors.is_empty(), "Query failed: {:?}", errors);
    rows
}

// Sorted (summary index, family id, allele) keys of the rows.
fn keys(rows: &[VariantResult]) -> Vec<(u64, String, Vec<usize>)> {
    let mut result: Vec<(u64, String, Vec<usize>)> = rows.iter().map(|row| {
        let family_id = row.family_variant().map(|x| x.family_id().to_string()).unwrap_or_default();
        (row.summary().summary_index(), family_id, row.matched_alleles().to_vec())
    }).collect();
    result.sort();
    result
}

fn wait_for<F: Fn() -> bool>(condition: F, message: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "Timed out waiting: {}", message);
        thread::sleep(Duration::from_millis(5));
    }
}

//-----------------------------------------------------------------------------

#[test]
fn pool_acquire_and_release() {
    let (_dir, filename) = internal::populated_store();
    let pool = ConnectionPool::open(&filename, 1).unwrap();
    assert_eq!(pool.idle_count(), 1, "The first connection should be idle");

    let first = pool.acquire(Duration::from_millis(10));
    assert!(first.is_ok(), "Failed to acquire a connection: {}", first.unwrap_err());
    let first = first.unwrap();
    let count: i64 = first.query_row("SELECT COUNT(*) FROM Tags", (), |row| row.get(0)).unwrap();
    assert!(count > 0, "The connection does not see the store");

    let second = pool.acquire(Duration::from_millis(20));
    assert!(matches!(second, Err(ConnectionError::Timeout(_))), "Acquired more connections than the pool size");
    drop(first);
    assert_eq!(pool.idle_count(), 1, "Connection was not returned");
    assert!(pool.acquire(Duration::from_millis(10)).is_ok(), "Failed to acquire a released connection");

    pool.close();
    assert!(matches!(pool.acquire(Duration::from_millis(10)), Err(ConnectionError::PoolClosed)), "Acquired from a closed pool");
    assert_eq!(pool.open_count(), 0, "Closing the pool left connections open");

    let dir = tempfile::tempdir().unwrap();
    let missing = ConnectionPool::open(dir.path().join("missing.db"), 1);
    assert!(matches!(missing, Err(ConnectionError::Open(_))), "Opened a pool for a missing file");
}

#[test]
fn pool_wakes_waiters() {
    let (_dir, filename) = internal::populated_store();
    let pool = ConnectionPool::open(&filename, 1).unwrap();
    let held = pool.acquire(Duration::from_millis(10)).unwrap();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire(Duration::from_secs(10)).is_ok())
    };
    thread::sleep(Duration::from_millis(20));
    drop(held);
    assert!(waiter.join().unwrap(), "Waiting thread did not get the released connection");
}

//-----------------------------------------------------------------------------

#[test]
fn family_queries() {
    let fixture = fixture(ExecutorParams::default());
    let context = &fixture.context;

    let all = rows(&fixture, QueryBuilder::family(context));
    assert_eq!(all.len(), 7, "Wrong number of family alleles: {:?}", keys(&all));
    let with_unknown = rows(&fixture, QueryBuilder::family(context).with_return_unknown(true));
    assert_eq!(with_unknown.len(), 8, "Unknown family allele was not returned");

    let denovo = rows(&fixture, QueryBuilder::family(context).with_inheritance("denovo"));
    assert_eq!(keys(&denovo), vec![(1, String::from("f1"), vec![1])], "Wrong de novo variants");
    let allele = denovo[0].family_variant().and_then(|x| x.allele(1));
    assert!(allele.is_some_and(|x| x.is_denovo()), "The result is not de novo");

    let rare = rows(&fixture, QueryBuilder::family(context).with_frequency_range(None, Some(5.0)));
    assert_eq!(rare.len(), 5, "Wrong number of rare alleles: {:?}", keys(&rare));
    let ultra_rare = rows(&fixture, QueryBuilder::family(context).with_ultra_rare(true));
    assert_eq!(keys(&ultra_rare), vec![(1, String::from("f1"), vec![1])], "Wrong ultra-rare alleles");

    let proband = rows(&fixture, QueryBuilder::family(context).with_person_ids(&["f1.p1"]));
    assert_eq!(proband.len(), 4, "Wrong number of alleles in the f1 proband: {:?}", keys(&proband));

    let region = rows(&fixture, QueryBuilder::family(context).with_regions(vec![Region::new("chr1", 1000, 2000)]));
    assert_eq!(keys(&region), vec![(1, String::from("f1"), vec![1])], "Wrong alleles in chr1:1000-2000");

    let scored = rows(&fixture, QueryBuilder::family(context).with_real_attr_filter("cadd_raw", Some(20.0), None));
    assert_eq!(scored.len(), 1, "Wrong number of alleles with a high score");

    let limited = rows(&fixture, QueryBuilder::family(context).with_limit(Some(3)));
    assert_eq!(limited.len(), 3, "Limit was not applied");
}

#[test]
fn summary_queries() {
    let fixture = fixture(ExecutorParams::default());
    let context = &fixture.context;

    let gene = rows(&fixture, QueryBuilder::summary(context).with_genes(&["GENE2"]));
    assert_eq!(gene.len(), 2, "Wrong number of GENE2 alleles");
    let coalesced: Vec<VariantResult> = query::coalesce_rows(gene).collect();
    assert_eq!(coalesced.len(), 1, "GENE2 alleles were not coalesced");
    assert_eq!(coalesced[0].matched_alleles(), &[1, 2], "Wrong coalesced alleles");

    let coding = rows(&fixture, QueryBuilder::summary(context).with_effect_types(&["missense"]));
    assert_eq!(keys(&coding).iter().map(|x| x.0).collect::<Vec<_>>(), vec![1, 5], "Wrong missense variants");

    let insertions = rows(&fixture, QueryBuilder::summary(context).with_variant_type("ins"));
    assert_eq!(keys(&insertions).iter().map(|x| x.0).collect::<Vec<_>>(), vec![4], "Wrong insertions");

    let everything = rows(&fixture, QueryBuilder::summary(context).with_return_reference(true));
    assert_eq!(everything.len(), 11, "Wrong number of summary alleles");
}

#[test]
fn pruning_is_sound() {
    let fixture = fixture(ExecutorParams::default());
    let context = &fixture.context;
    let chromosomes = ["chr1", "chr2", "chr3", "chrX", "chrUn"];
    let effects = ["missense", "synonymous", "intron", "coding", "LGDs"];
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..60 {
        let mut builder = QueryBuilder::family(context).with_return_reference(rng.gen_bool(0.3));
        if rng.gen_bool(0.7) {
            let count = rng.gen_range(1..=3);
            let mut regions = Vec::new();
            for _ in 0..count {
                let chromosome = chromosomes[rng.gen_range(0..chromosomes.len())];
                if rng.gen_bool(0.2) {
                    regions.push(Region::chromosome(chromosome));
                } else {
                    // Some regions extend past the end of the chromosome.
                    let start = rng.gen_range(0..12000);
                    let end = match rng.gen_range(0..10) {
                        0 => u64::MAX,
                        1 => start + rng.gen_range(0..1_000_000),
                        _ => start + rng.gen_range(0..3000),
                    };
                    regions.push(Region::new(chromosome, start, end));
                }
            }
            builder = builder.with_regions(regions);
        }
        if rng.gen_bool(0.4) {
            let min = if rng.gen_bool(0.5) { Some(rng.gen_range(0.0..10.0)) } else { None };
            let max = if rng.gen_bool(0.5) { Some(min.unwrap_or(0.0) + rng.gen_range(0.0..30.0)) } else { None };
            builder = builder.with_frequency_range(min, max);
        }
        if rng.gen_bool(0.2) {
            builder = builder.with_ultra_rare(true);
        }
        if rng.gen_bool(0.3) {
            builder = builder.with_effect_types(&[effects[rng.gen_range(0..effects.len())]]);
        }
        if rng.gen_bool(0.3) {
            let family_ids: Vec<&str> = ["f1", "f2", "f3"].into_iter().filter(|_| rng.gen_bool(0.5)).collect();
            if !family_ids.is_empty() {
                builder = builder.with_family_ids(&family_ids);
            }
        }

        let pruned = rows(&fixture, builder.clone());
        let full = rows(&fixture, builder.clone().with_pruning(false));
        let query = builder.build().unwrap();
        assert_eq!(keys(&pruned), keys(&full), "Pruning changed the results of {}", query.inline_sql());
    }
}

//-----------------------------------------------------------------------------

#[test]
fn close_while_waiting_for_connection() {
    let params = ExecutorParams { workers: 1, pool_size: 1, acquire_timeout: Duration::from_millis(5), ..ExecutorParams::default() };
    let fixture = fixture(params);
    let pool = fixture.executor.pool().clone();
    let held = pool.acquire(Duration::from_millis(100)).unwrap();

    let first = fixture.executor.submit(QueryBuilder::family(&fixture.context).build().unwrap());
    let second = fixture.executor.submit(QueryBuilder::family(&fixture.context).build().unwrap());
    wait_for(|| first.state() == HandleState::Running, "the first query should be waiting for a connection");
    assert_eq!(second.state(), HandleState::Created, "The second query should wait for the worker");

    second.close();
    assert_eq!(second.state(), HandleState::Closed, "Closing a created handle failed");
    first.closer().close();
    assert_eq!(first.state(), HandleState::Closed, "Closing a running handle failed");
    first.close();
    assert_eq!(first.state(), HandleState::Closed, "Closing twice changed the state");

    drop(held);
    wait_for(|| pool.idle_count() == 1, "the connection should return to the pool");
    assert!(first.error().is_none() && second.error().is_none(), "Closed handles have errors");
    let mut second = second;
    assert!(second.next().is_none(), "Closed handle returned rows");
}

#[test]
fn close_after_done() {
    let fixture = fixture(ExecutorParams::default());
    let mut handle = fixture.executor.submit(QueryBuilder::family(&fixture.context).build().unwrap());
    let mut count = 0;
    for item in handle.by_ref() {
        assert!(item.is_ok(), "Query failed: {}", item.unwrap_err());
        count += 1;
    }
    assert_eq!(count, 7, "Wrong number of rows");
    assert_eq!(handle.state(), HandleState::Done, "Finished query is not done");
    handle.close();
    assert_eq!(handle.state(), HandleState::Done, "Closing a finished query changed the state");
    assert!(handle.error().is_none(), "Finished query has an error");
}

#[test]
fn close_mid_stream() {
    let params = ExecutorParams { workers: 1, pool_size: 1, channel_capacity: 1, ..ExecutorParams::default() };
    let fixture = fixture(params);
    let query = QueryBuilder::family(&fixture.context).with_return_reference(true).with_return_unknown(true).build().unwrap();
    let mut handle = fixture.executor.submit(query);
    let first = handle.next();
    assert!(first.as_ref().is_some_and(|x| x.is_ok()), "Failed to read the first row");

    handle.close();
    assert!(handle.next().is_none(), "Closed handle returned more rows");
    assert_eq!(handle.state(), HandleState::Closed, "Wrong state after closing mid-stream");
    assert!(handle.error().is_none(), "Closing mid-stream recorded an error");
    let pool = fixture.executor.pool();
    wait_for(|| pool.idle_count() == 1, "the connection should return to the pool");
}

#[test]
fn nobody_consuming() {
    let params = ExecutorParams {
        workers: 1,
        pool_size: 1,
        channel_capacity: 1,
        send_timeout: Duration::from_millis(2),
        warn_after: 2,
        cancel_after: 5,
        ..ExecutorParams::default()
    };
    let fixture = fixture(params);
    let query = QueryBuilder::family(&fixture.context).with_return_reference(true).with_return_unknown(true).build().unwrap();
    let handle = fixture.executor.submit(query);
    wait_for(|| handle.state() == HandleState::Closed, "the query should close itself");
    assert!(matches!(handle.error(), Some(QueryError::Cancelled(5))), "Self-closed query should report the cancellation: {:?}", handle.error());
    let pool = fixture.executor.pool();
    wait_for(|| pool.idle_count() == 1, "the connection should return to the pool");
}

//-----------------------------------------------------------------------------

#[test]
fn execution_errors() {
    let fixture = fixture(ExecutorParams::default());
    let mut query = QueryBuilder::summary(&fixture.context).build().unwrap();
    query.sql = String::from("SELECT * FROM no_such_table");
    let (rows, errors) = run_query(&fixture, query.clone());
    assert!(rows.is_empty(), "Failed query returned rows");
    assert_eq!(errors.len(), 1, "Expected exactly one error marker");
    assert!(matches!(errors[0], QueryError::Execution(_)), "Wrong error: {}", errors[0]);

    let handle = fixture.executor.submit(query.clone());
    wait_for(|| handle.state() == HandleState::Done, "the failed query should be done");
    assert!(matches!(handle.error(), Some(QueryError::Execution(_))), "Error was not recorded in the handle");

    // Undecodable blobs are dropped.
    query.sql = String::from("SELECT 0, 1, 1, X'00'");
    let (rows, errors) = run_query(&fixture, query.clone());
    assert!(rows.is_empty() && errors.is_empty(), "Undecodable record was not dropped");

    // Wrong column types fail the query.
    query.sql = String::from("SELECT 'x', 1, 1, X'00'");
    let (rows, errors) = run_query(&fixture, query.clone());
    assert!(rows.is_empty(), "Query with a wrong column type returned rows");
    assert!(matches!(errors.as_slice(), [QueryError::Decode(_)]), "Wrong errors for a wrong column type: {:?}", errors);
}

//-----------------------------------------------------------------------------
