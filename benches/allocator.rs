#![feature(test)]
extern crate pagepool;
extern crate test;
#[macro_use]
extern crate trackable;

use pagepool::chunk::{Chunk, ChunkBuilder};
use pagepool::page::PageSize;
use pagepool::subpage::SubpagePools;
use test::Bencher;

fn chunk(max_order: u8) -> Chunk<()> {
    let page_size = track_try_unwrap!(PageSize::new(8192));
    track_try_unwrap!(ChunkBuilder::new(page_size, max_order).build(()))
}

#[bench]
fn run_allocate_and_free(b: &mut Bencher) {
    let mut pools = SubpagePools::new();
    let mut chunk = chunk(11);
    b.iter(|| {
        let h = chunk.allocate(8192, &mut pools).expect("Never fails");
        chunk.free(h, &mut pools);
    });
}

#[bench]
fn run_fill_and_drain(b: &mut Bencher) {
    let mut pools = SubpagePools::new();
    let mut chunk = chunk(8);
    let mut handles = Vec::with_capacity(256);
    b.iter(|| {
        while let Some(h) = chunk.allocate(8192, &mut pools) {
            handles.push(h);
        }
        for h in handles.drain(..) {
            chunk.free(h, &mut pools);
        }
    });
}

#[bench]
fn subpage_allocate_and_free(b: &mut Bencher) {
    let mut pools = SubpagePools::new();
    let mut chunk = chunk(11);
    b.iter(|| {
        let h = chunk.allocate(64, &mut pools).expect("Never fails");
        chunk.free(h, &mut pools);
    });
}
