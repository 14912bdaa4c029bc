//! Benchmarks for the invoice scoring engine.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use invoice_radar::detect::{DetectionConfig, InvoiceDetector, KeywordConfiguration};
use invoice_radar::mail::{AttachmentMeta, CanonicalMessage};

fn detector() -> InvoiceDetector {
    InvoiceDetector::new(DetectionConfig::default(), KeywordConfiguration::default()).unwrap()
}

fn message(subject: &str, sender: &str, body: &str, attachments: Vec<AttachmentMeta>) -> CanonicalMessage {
    let mut msg: CanonicalMessage = serde_json::from_str("{}").unwrap();
    msg.subject = subject.to_string();
    msg.sender = sender.to_string();
    msg.body = body.to_string();
    msg.has_attachments = !attachments.is_empty();
    msg.attachments = attachments;
    msg
}

fn invoice_message() -> CanonicalMessage {
    let body = "尊敬的客户：\n发票号码：04400210\n开票日期：2025年06月08日\n价税合计：¥1,280.50\n\
                销售方：深圳市示例科技有限公司\n纳税人识别号：91440300MA5F000000\n"
        .repeat(4);
    message(
        "电子发票通知 Invoice INV-2025-0042",
        "Billing <billing@example.com>",
        &body,
        vec![AttachmentMeta {
            filename: "发票-0042.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 48_000,
            content: None,
        }],
    )
}

fn newsletter_message() -> CanonicalMessage {
    let body = "This week: release notes, a conference recap and three new tutorials.\n".repeat(40);
    message("Weekly digest", "News <news@example.org>", &body, Vec::new())
}

fn bench_detect_invoice(c: &mut Criterion) {
    let detector = detector();
    let msg = invoice_message();
    c.bench_function("detect_invoice", |bench| {
        bench.iter(|| black_box(detector.detect(black_box(&msg))))
    });
}

fn bench_detect_newsletter(c: &mut Criterion) {
    let detector = detector();
    let msg = newsletter_message();
    c.bench_function("detect_newsletter", |bench| {
        bench.iter(|| black_box(detector.detect(black_box(&msg))))
    });
}

fn bench_detect_batch(c: &mut Criterion) {
    let detector = detector();
    let batch: Vec<_> = (0..100)
        .map(|i| if i % 10 == 0 { invoice_message() } else { newsletter_message() })
        .collect();
    c.bench_function("detect_all_100", |bench| {
        bench.iter_batched(
            || batch.clone(),
            |mut messages| black_box(detector.detect_all(&mut messages)),
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_build_detector(c: &mut Criterion) {
    c.bench_function("build_detector", |bench| bench.iter(|| black_box(detector())));
}

criterion_group!(
    benches,
    bench_detect_invoice,
    bench_detect_newsletter,
    bench_detect_batch,
    bench_build_detector
);
criterion_main!(benches);
