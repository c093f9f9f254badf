//! Benchmarks for crontab compilation and import.

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use cronkeep::{Compiler, Environment, Job, JobDraft, JobId, Validator, parse_crontab};

fn jobs(count: usize) -> Vec<Job> {
    (0..count)
        .map(|i| {
            let draft = JobDraft::new(format!("/usr/local/bin/task-{} --verbose", i), "15 */2 * * 1-5")
                .with_logging(i % 2 == 0)
                .with_stopped(i % 10 == 0);
            Job::from_draft(JobId::new(format!("{:032x}", i)), draft, Utc::now())
        })
        .collect()
}

fn bench_compile(c: &mut Criterion) {
    let compiler = Compiler::new("/var/lib/cronkeep/crontabs", "/var/lib/cronkeep/logs");
    let env = Environment::new("SHELL=/bin/sh\nPATH=/usr/local/bin:/usr/bin:/bin");
    let mut group = c.benchmark_group("compile");

    for size in [10, 100, 1000].iter() {
        let jobs = jobs(*size);
        group.bench_with_input(BenchmarkId::new("jobs", size), &jobs, |b, jobs| {
            b.iter(|| compiler.compile(jobs, &env));
        });
    }

    group.finish();
}

fn bench_import(c: &mut Criterion) {
    let compiler = Compiler::new("/var/lib/cronkeep/crontabs", "/var/lib/cronkeep/logs");
    let text = compiler.compile(&jobs(1000), &Environment::default()).text;

    c.bench_function("import_1000", |b| b.iter(|| parse_crontab(&text)));
}

fn bench_validate(c: &mut Criterion) {
    let validator = Validator::new();
    let draft = JobDraft::new(
        "pg_dump -Fc app | gzip > /var/backups/app-$(date +%F).dump.gz",
        "30 2 * * *",
    );

    c.bench_function("validate_draft", |b| {
        b.iter(|| validator.validate_draft(&draft))
    });
}

criterion_group!(benches, bench_compile, bench_import, bench_validate);
criterion_main!(benches);
