//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, MetricBuilder};

/// チャンクアロケータのメトリクス.
#[derive(Debug, Clone)]
pub struct ChunkAllocatorMetrics {
    pub(crate) allocated_runs: Counter,
    pub(crate) released_runs: Counter,
    pub(crate) allocated_bytes: Counter,
    pub(crate) released_bytes: Counter,
    pub(crate) sliced_pages: Counter,
    pub(crate) reclaimed_pages: Counter,
    pub(crate) allocated_elems: Counter,
    pub(crate) released_elems: Counter,
    pub(crate) nospace_failures: Counter,
    pub(crate) chunk_size: u64,
}
impl ChunkAllocatorMetrics {
    /// ランの確保回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_allocated_runs_total <COUNTER>
    /// ```
    pub fn allocated_runs(&self) -> u64 {
        self.allocated_runs.value() as u64
    }

    /// ランの解放回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_released_runs_total <COUNTER>
    /// ```
    pub fn released_runs(&self) -> u64 {
        self.released_runs.value() as u64
    }

    /// これまでに木から確保されたバイト数の合計.
    ///
    /// ラン確保分に加えて、サブページ用に切り出されたページの分も
    /// (ページ獲得時に一度だけ)含まれる.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_allocated_bytes_total <COUNTER>
    /// ```
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.value() as u64
    }

    /// これまでに木へ返却されたバイト数の合計.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_released_bytes_total <COUNTER>
    /// ```
    pub fn released_bytes(&self) -> u64 {
        self.released_bytes.value() as u64
    }

    /// サブページ用に切り出されたページの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_sliced_pages_total <COUNTER>
    /// ```
    pub fn sliced_pages(&self) -> u64 {
        self.sliced_pages.value() as u64
    }

    /// サブページから木へ回収されたページの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_reclaimed_pages_total <COUNTER>
    /// ```
    pub fn reclaimed_pages(&self) -> u64 {
        self.reclaimed_pages.value() as u64
    }

    /// サブページ要素の確保回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_allocated_elems_total <COUNTER>
    /// ```
    pub fn allocated_elems(&self) -> u64 {
        self.allocated_elems.value() as u64
    }

    /// サブページ要素の解放回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_released_elems_total <COUNTER>
    /// ```
    pub fn released_elems(&self) -> u64 {
        self.released_elems.value() as u64
    }

    /// 空き領域不足による確保失敗回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_nospace_failures_total <COUNTER>
    /// ```
    pub fn nospace_failures(&self) -> u64 {
        self.nospace_failures.value() as u64
    }

    /// このチャンクの領域長(バイト単位).
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// チャンクの使用量(バイト単位).
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// pagepool_chunk_allocator_allocated_bytes_total - pagepool_chunk_allocator_released_bytes_total
    /// ```
    pub fn usage_bytes(&self) -> u64 {
        // NOTE: 以下の順番で値を取得しないとアンダーフローする可能性がある
        let dec = self.released_bytes();
        let inc = self.allocated_bytes();
        inc - dec
    }

    pub(crate) fn new(builder: &MetricBuilder, chunk_size: u64) -> Self {
        let mut builder = builder.clone();
        builder.namespace("pagepool").subsystem("chunk_allocator");
        ChunkAllocatorMetrics {
            allocated_runs: builder
                .counter("allocated_runs_total")
                .help("Number of allocated runs")
                .finish()
                .expect("Never fails"),
            released_runs: builder
                .counter("released_runs_total")
                .help("Number of released runs")
                .finish()
                .expect("Never fails"),
            allocated_bytes: builder
                .counter("allocated_bytes_total")
                .help("Number of bytes allocated from the buddy tree")
                .finish()
                .expect("Never fails"),
            released_bytes: builder
                .counter("released_bytes_total")
                .help("Number of bytes released to the buddy tree")
                .finish()
                .expect("Never fails"),
            sliced_pages: builder
                .counter("sliced_pages_total")
                .help("Number of pages sliced for subpage allocation")
                .finish()
                .expect("Never fails"),
            reclaimed_pages: builder
                .counter("reclaimed_pages_total")
                .help("Number of pages reclaimed from subpages")
                .finish()
                .expect("Never fails"),
            allocated_elems: builder
                .counter("allocated_elems_total")
                .help("Number of allocated subpage elements")
                .finish()
                .expect("Never fails"),
            released_elems: builder
                .counter("released_elems_total")
                .help("Number of released subpage elements")
                .finish()
                .expect("Never fails"),
            nospace_failures: builder
                .counter("nospace_failures_total")
                .help("Number of allocation failures caused by no available space")
                .finish()
                .expect("Never fails"),
            chunk_size,
        }
    }

    pub(crate) fn count_run_allocation(&self, len: u32) {
        self.allocated_runs.increment();
        self.allocated_bytes.add_u64(u64::from(len));
    }

    pub(crate) fn count_run_release(&self, len: u32) {
        self.released_runs.increment();
        self.released_bytes.add_u64(u64::from(len));
    }

    pub(crate) fn count_page_slice(&self, page_size: u32) {
        self.sliced_pages.increment();
        self.allocated_bytes.add_u64(u64::from(page_size));
    }

    pub(crate) fn count_page_reclamation(&self, page_size: u32) {
        self.reclaimed_pages.increment();
        self.released_bytes.add_u64(u64::from(page_size));
    }

    pub(crate) fn count_elem_allocation(&self) {
        self.allocated_elems.increment();
    }

    pub(crate) fn count_elem_release(&self) {
        self.released_elems.increment();
    }
}
