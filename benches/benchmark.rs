use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vio::device::buffer::OutputBuffer;

fn bench_buffer_append_flush(c: &mut Criterion) {
    c.bench_function("buffer: 100 line writes + take", |b| {
        b.iter(|| {
            let mut buffer = OutputBuffer::new();
            for i in 0..100 {
                buffer.push(black_box(format!("line {}\n", i)));
            }
            black_box(buffer.take())
        })
    });

    c.bench_function("buffer: 100 redraw frames + take", |b| {
        b.iter(|| {
            let mut buffer = OutputBuffer::new();
            for i in 0..100 {
                buffer.push(black_box(format!("progress: {}\r", i)));
            }
            black_box(buffer.take())
        })
    });
}

criterion_group!(benches, bench_buffer_append_flush);
criterion_main!(benches);
