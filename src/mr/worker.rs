//! The worker side of the protocol: a poll loop over the coordinator's
//! RPC surface, the map-side partitioning of intermediate output into
//! `NReduce` shards, and the reduce-side gather/sort/aggregate pipeline.
//!
//! A worker is stateless across iterations. Nothing here remembers a
//! task once it has been reported complete; every entry point takes the
//! wire `Task` it was handed and nothing more, trusting the coordinator
//! for task identity the way the teacher's `Worker` trusted its own
//! task ids without caching job state.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use rayon::slice::ParallelSliceMut;
use tarpc::context;
use tempfile::NamedTempFile;

use crate::mr::error::Error;
use crate::mr::function::{MapFn, ReduceFn};
use crate::mr::rpc::{self, CoordinatorRpcClient, KeyValue, Task, TaskKind, TaskStatus};

/// How long a worker backs off before re-polling after an "empty"
/// `AssignTask` reply. Shorter than the coordinator's reap timeout:
/// an empty reply is the common case (nothing eligible *right now*),
/// not a rare barrier, so there's no reason to wait as long as the
/// coordinator's own lease checks do.
const EMPTY_REPLY_BACKOFF: Duration = Duration::from_millis(250);

/// Run the poll loop until the coordinator signals `Stage::Complete` or
/// the RPC transport fails. A transport failure is treated as fatal:
/// the worker exits, and the task it may have held (if any) is
/// recovered by the coordinator's reaper once its lease expires.
pub async fn run(
    client: CoordinatorRpcClient,
    mapf: MapFn,
    reducef: ReduceFn,
) -> anyhow::Result<()> {
    loop {
        let task = client.assign_task(context::current()).await?;

        if task.status == TaskStatus::Complete {
            tracing::info!("coordinator signalled job complete, worker exiting");
            return Ok(());
        }
        if task.is_empty() {
            tokio::time::sleep(EMPTY_REPLY_BACKOFF).await;
            continue;
        }

        match task.kind {
            TaskKind::Map => {
                tracing::info!(task_id = task.task_id, "executing map task");
                execute_map(&task, mapf)?;
            }
            TaskKind::Reduce => {
                tracing::info!(task_id = task.task_id, "executing reduce task");
                execute_reduce(&task, reducef)?;
            }
        }

        let report = Task {
            status: TaskStatus::Complete,
            ..task
        };
        client.update_task_status(context::current(), report).await?;
    }
}

/// Map execution: read the input file, invoke `mapf`, partition the
/// emitted pairs across `NReduce` shards by `ihash(key) % NReduce`, and
/// publish all `NReduce` shard files atomically. Every shard is created
/// and renamed even if it receives zero records, so an empty input file
/// still yields `NReduce` present-but-empty `mr-M-R` files.
pub fn execute_map(task: &Task, mapf: MapFn) -> Result<(), Error> {
    execute_map_in(Path::new("."), task, mapf)
}

fn execute_map_in(dir: &Path, task: &Task, mapf: MapFn) -> Result<(), Error> {
    let contents = fs::read_to_string(&task.filepath).map_err(|source| Error::ReadInput {
        path: task.filepath.clone(),
        source,
    })?;

    let pairs = mapf(&task.filepath, &contents);

    let mut staged = (0..task.n_reduce)
        .map(|_| NamedTempFile::new_in(dir).map_err(Error::Write))
        .collect::<Result<Vec<_>, _>>()?;

    for kv in &pairs {
        let partition = (rpc::ihash(&kv.key) % task.n_reduce) as usize;
        let file = staged[partition].as_file_mut();
        serde_json::to_writer(&mut *file, kv).map_err(|source| Error::Encode {
            partition,
            source,
        })?;
        file.write_all(b"\n").map_err(Error::Write)?;
    }

    // Atomic publish: no reducer can ever observe a partially written
    // shard under its final name. A reaped worker's rival renaming over
    // an already-published shard is fine — the contents are equivalent.
    for (partition, shard) in staged.into_iter().enumerate() {
        let final_path = dir.join(format!("mr-{}-{}", task.task_id, partition));
        shard.persist(&final_path).map_err(|e| Error::Write(e.error))?;
    }

    Ok(())
}

/// Reduce execution: gather every shard published for this partition
/// across all map tasks, sort by key, group, call `reducef` once per
/// distinct key, and publish the output file atomically.
pub fn execute_reduce(task: &Task, reducef: ReduceFn) -> Result<(), Error> {
    execute_reduce_in(Path::new("."), task, reducef)
}

fn execute_reduce_in(dir: &Path, task: &Task, reducef: ReduceFn) -> Result<(), Error> {
    let mut pairs = gather_shards(dir, task.task_id)?;
    // One reduce task can gather a large fraction of the job's
    // intermediate output; sort it with rayon rather than pulling in
    // a second sequential pass over a potentially big vector.
    pairs.par_sort_by(|a, b| a.key.cmp(&b.key));

    let mut staged = NamedTempFile::new_in(dir).map_err(Error::Write)?;
    {
        let writer = staged.as_file_mut();
        let mut i = 0;
        while i < pairs.len() {
            let mut j = i + 1;
            while j < pairs.len() && pairs[j].key == pairs[i].key {
                j += 1;
            }
            let values: Vec<String> = pairs[i..j].iter().map(|kv| kv.value.clone()).collect();
            let reduced = reducef(&pairs[i].key, &values);
            writeln!(writer, "{} {}", pairs[i].key, reduced).map_err(Error::Write)?;
            i = j;
        }
    }

    let final_path = dir.join(format!("mr-out-{}", task.task_id));
    staged.persist(&final_path).map_err(|e| Error::Write(e.error))?;
    Ok(())
}

/// Collect every intermediate record published for `reduce_task_id`
/// across all map tasks.
fn gather_shards(dir: &Path, reduce_task_id: u32) -> Result<Vec<KeyValue>, Error> {
    let mut pairs = Vec::new();
    for entry in fs::read_dir(dir).map_err(Error::Scan)? {
        let entry = entry.map_err(Error::Scan)?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !is_shard_for_reducer(name, reduce_task_id) {
            continue;
        }

        let contents = fs::read_to_string(entry.path()).map_err(|source| Error::ReadInput {
            path: name.to_string(),
            source,
        })?;
        for record in serde_json::Deserializer::from_str(&contents).into_iter::<KeyValue>() {
            let kv = record.map_err(|source| Error::Decode {
                file: name.to_string(),
                source,
            })?;
            pairs.push(kv);
        }
    }
    Ok(pairs)
}

/// True iff `filename` is `mr-<M>-<R>` with `R == reduce_task_id` and
/// `M` a numeric map task id. Deliberately rejects anything else,
/// notably `mr-out-R`, whose middle segment ("out") never parses as a
/// task id — a reducer must never mistake a prior run's final output
/// for an intermediate shard destined for it.
fn is_shard_for_reducer(filename: &str, reduce_task_id: u32) -> bool {
    let mut parts = filename.split('-');
    let Some("mr") = parts.next() else {
        return false;
    };
    let Some(Ok(_map_id)) = parts.next().map(str::parse::<u32>) else {
        return false;
    };
    let Some(Ok(r)) = parts.next().map(str::parse::<u32>) else {
        return false;
    };
    parts.next().is_none() && r == reduce_task_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn word_count_map(_filename: &str, contents: &str) -> Vec<KeyValue> {
        contents
            .split_whitespace()
            .map(|w| KeyValue::new(w.to_string(), "1"))
            .collect()
    }

    fn word_count_reduce(_key: &str, values: &[String]) -> String {
        values.len().to_string()
    }

    fn map_task(dir: &Path, task_id: u32, input: &str, n_reduce: u32) -> Task {
        let path = dir.join(format!("input-{task_id}.txt"));
        fs::write(&path, input).unwrap();
        Task {
            kind: TaskKind::Map,
            task_id,
            status: TaskStatus::InProgress,
            filepath: path.to_string_lossy().into_owned(),
            n_reduce,
        }
    }

    fn reduce_task(task_id: u32, n_reduce: u32) -> Task {
        Task {
            kind: TaskKind::Reduce,
            task_id,
            status: TaskStatus::InProgress,
            filepath: String::new(),
            n_reduce,
        }
    }

    #[test]
    fn is_shard_for_reducer_matches_only_numeric_map_ids() {
        assert!(is_shard_for_reducer("mr-0-3", 3));
        assert!(!is_shard_for_reducer("mr-0-3", 2));
        assert!(!is_shard_for_reducer("mr-out-3", 3));
        assert!(!is_shard_for_reducer("mr-0-3-extra", 3));
        assert!(!is_shard_for_reducer("not-mr-0-3", 3));
    }

    #[test]
    fn map_publishes_all_shards_even_when_empty() {
        let dir = TempDir::new().unwrap();
        let task = map_task(dir.path(), 0, "", 3);

        execute_map_in(dir.path(), &task, word_count_map).unwrap();

        for r in 0..3 {
            let shard = dir.path().join(format!("mr-0-{r}"));
            assert!(shard.exists());
            assert_eq!(fs::read_to_string(shard).unwrap(), "");
        }
    }

    #[test]
    fn map_then_reduce_round_trips_word_count() {
        let dir = TempDir::new().unwrap();
        let a = map_task(dir.path(), 0, "a a b", 2);
        let b = map_task(dir.path(), 1, "b c", 2);

        execute_map_in(dir.path(), &a, word_count_map).unwrap();
        execute_map_in(dir.path(), &b, word_count_map).unwrap();

        for r in 0..2 {
            let task = reduce_task(r, 2);
            execute_reduce_in(dir.path(), &task, word_count_reduce).unwrap();
        }

        let mut lines: Vec<String> = (0..2)
            .flat_map(|r| {
                let contents = fs::read_to_string(dir.path().join(format!("mr-out-{r}"))).unwrap();
                contents
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        lines.sort();
        assert_eq!(lines, vec!["a 2", "b 2", "c 1"]);
    }

    #[test]
    fn reduce_groups_every_value_for_a_repeated_key() {
        let dir = TempDir::new().unwrap();
        let task = map_task(dir.path(), 0, "x x x x", 1);
        execute_map_in(dir.path(), &task, word_count_map).unwrap();

        let reduce = reduce_task(0, 1);
        execute_reduce_in(dir.path(), &reduce, word_count_reduce).unwrap();

        let out = fs::read_to_string(dir.path().join("mr-out-0")).unwrap();
        assert_eq!(out, "x 4\n");
    }

    #[test]
    fn reduce_ignores_output_files_from_a_prior_run() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("mr-out-0"), "stale 99\n").unwrap();
        let task = map_task(dir.path(), 0, "fresh", 1);
        execute_map_in(dir.path(), &task, word_count_map).unwrap();

        let reduce = reduce_task(0, 1);
        execute_reduce_in(dir.path(), &reduce, word_count_reduce).unwrap();

        let out = fs::read_to_string(dir.path().join("mr-out-0")).unwrap();
        assert_eq!(out, "fresh 1\n");
    }
}
