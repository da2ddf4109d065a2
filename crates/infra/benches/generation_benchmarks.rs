use std::hint::black_box;
use std::sync::Arc;

use chrono::{Duration, Utc};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use feeledger_billing::{
    AcademicYear, BillingMonth, BillingPeriod, ComponentType, FeeComponent, FeeStructureId,
    Frequency, PaymentDetails, PaymentMethod,
};
use feeledger_core::{AccountId, Money, TenantId, UserId};
use feeledger_infra::directory::{Account, CohortFilter, InMemoryCohortDirectory};
use feeledger_infra::projections::InvoiceFilter;
use feeledger_infra::services::{DefineStructure, GenerateInvoices, RecordPaymentRequest};
use feeledger_infra::{BillingConfig, BillingContext, InMemoryBillingEngine};

fn year() -> AcademicYear {
    AcademicYear::parse("2025-2026").unwrap()
}

fn component(name: &str, amount: u64, frequency: Frequency) -> FeeComponent {
    FeeComponent {
        name: name.to_string(),
        component_type: ComponentType::Tuition,
        amount: Money::from_minor(amount),
        frequency,
        is_mandatory: true,
        due_day: 10,
    }
}

/// Engine with one structure and a roster of `accounts`, every fifth discounted.
fn setup(accounts: usize, workers: usize) -> (InMemoryBillingEngine, BillingContext, FeeStructureId) {
    let directory = Arc::new(InMemoryCohortDirectory::new());
    let engine = InMemoryBillingEngine::in_memory(
        directory.clone(),
        BillingConfig::default().with_generation_workers(workers),
    );
    let ctx = BillingContext::new(TenantId::new(), UserId::new());
    let structure = engine
        .define_structure(
            &ctx,
            DefineStructure {
                name: "Grade 5".to_string(),
                academic_year: year(),
                cohort_groups: vec![],
                description: None,
                components: vec![
                    component("Tuition", 50_000, Frequency::Monthly),
                    component("Transport", 12_000, Frequency::Monthly),
                    component("Admission", 100_000, Frequency::OneTime),
                ],
                late_fee: None,
            },
        )
        .unwrap();
    directory
        .upsert_accounts(
            ctx.tenant_id,
            "grade-5",
            (0..accounts).map(|i| Account {
                account_id: AccountId::new(),
                name: format!("student-{i}"),
                group: None,
                active: true,
                discount_percent: (i % 5 == 0).then(|| "12.5".to_string()),
            }),
        )
        .unwrap();
    (engine, ctx, structure.structure_id)
}

fn request(structure_id: FeeStructureId) -> GenerateInvoices {
    GenerateInvoices {
        structure_id,
        cohort: CohortFilter::new("grade-5"),
        period: BillingPeriod::monthly(year(), BillingMonth::new(4).unwrap()),
        due_date: Utc::now() + Duration::days(10),
        as_draft: false,
    }
}

fn bench_bulk_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_generation");
    group.sample_size(20);

    for accounts in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(accounts as u64));
        for workers in [1usize, 4] {
            group.bench_with_input(
                BenchmarkId::new(format!("workers_{workers}"), accounts),
                &accounts,
                |b, &accounts| {
                    b.iter_batched(
                        || setup(accounts, workers),
                        |(engine, ctx, structure_id)| {
                            let out = engine
                                .generate_invoices(&ctx, &request(structure_id))
                                .unwrap();
                            black_box(out.generated.len())
                        },
                        BatchSize::LargeInput,
                    );
                },
            );
        }
    }

    group.finish();
}

fn bench_idempotent_rerun(c: &mut Criterion) {
    let mut group = c.benchmark_group("idempotent_rerun");
    let (engine, ctx, structure_id) = setup(500, 4);
    engine.generate_invoices(&ctx, &request(structure_id)).unwrap();

    group.throughput(Throughput::Elements(500));
    group.bench_function("all_skipped_500", |b| {
        b.iter(|| {
            let out = engine.generate_invoices(&ctx, &request(structure_id)).unwrap();
            black_box(out.skipped)
        });
    });

    group.finish();
}

fn bench_payment_on_long_ledger(c: &mut Criterion) {
    let mut group = c.benchmark_group("payment_latency");

    for history in [0usize, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("record_payment_after", history),
            &history,
            |b, &history| {
                let (engine, ctx, structure_id) = setup(1, 1);
                engine.generate_invoices(&ctx, &request(structure_id)).unwrap();
                let invoice_id = engine.list_invoices(&ctx, &InvoiceFilter::default())[0].invoice_id;
                let pay = |amount: u64| RecordPaymentRequest {
                    invoice_id,
                    amount: Money::from_minor(amount),
                    method: PaymentMethod::Cash,
                    payment_date: None,
                    details: PaymentDetails::new(),
                    idempotency_key: None,
                };
                for _ in 0..history {
                    engine.record_payment(&ctx, pay(1)).unwrap();
                }

                // Rejected overpayments exercise load + rehydrate + decide
                // without growing the stream between samples.
                b.iter(|| {
                    let err = engine.record_payment(&ctx, pay(u64::MAX / 2)).unwrap_err();
                    black_box(err.kind())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_bulk_generation,
    bench_idempotent_rerun,
    bench_payment_on_long_ledger
);
criterion_main!(benches);
