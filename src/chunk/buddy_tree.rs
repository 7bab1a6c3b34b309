//! バディ二分木.

/// チャンク領域の割当状況を管理する完全二分木.
///
/// 木はヒープと同じ要領でフラットな配列にエンコードされる.
/// ノード番号は1始まり(根が`1`)で、番号`id`のノードに対して、
/// 子は`id << 1`と`(id << 1) + 1`、親は`id >> 1`、兄弟は`id ^ 1`で求まる.
///
/// 各ノードの状態値は「そのノードを根とする部分木の中で、
/// 丸ごと空いているノードが存在する最小の深さ」を表す:
///
/// - `state[id] == depth[id]`: ノード`id`自身が未割当
/// - `state[id] >  depth[id]`: 子孫の一部が割当済み(空き子孫の最小深さが`state[id]`)
/// - `state[id] == max_order + 1`: 部分木は葉まで全て割当済み(unusable)
///
/// この性質は確保・解放のたびに、割当ノードから根への一回の上昇走査で維持される.
#[derive(Debug)]
pub(crate) struct BuddyTree {
    state: Vec<u8>,
    depth: Vec<u8>,
    max_order: u8,
    unusable: u8,
}
impl BuddyTree {
    /// 全ノードが未割当の状態の木を生成する.
    pub fn new(max_order: u8) -> Self {
        let leaves = 1usize << max_order;
        let mut depth = Vec::with_capacity(leaves * 2);
        depth.push(0); // 番号0は使用しない
        for d in 0..=max_order {
            for _ in 0..(1u32 << d) {
                depth.push(d);
            }
        }
        let state = depth.clone();
        BuddyTree {
            state,
            depth,
            max_order,
            unusable: max_order + 1,
        }
    }

    /// 深さ`d`の未割当ノードを左端優先で探して割り当てる.
    ///
    /// 空きが無い場合には`None`が返される(木の状態は変更されない).
    pub fn allocate(&mut self, d: u8) -> Option<u32> {
        debug_assert!(d <= self.max_order);
        let mut id = 1u32;
        let initial = !((1u32 << d) - 1); // 下位dビットが0、それ以外が1
        let mut val = self.value(id);
        if val > d {
            return None;
        }
        // 深さdのノードでは `id & initial == 1 << d`、それより浅いノードでは0になる
        while val < d || (id & initial) == 0 {
            id <<= 1;
            val = self.value(id);
            if val > d {
                id ^= 1; // 兄弟ノードに切り替える
                val = self.value(id);
            }
        }
        debug_assert!(
            val == d && (id & initial) == (1 << d),
            "val={}, id={}, d={}",
            val,
            id,
            d
        );
        self.set_value(id, self.unusable);
        self.update_parents_alloc(id);
        Some(id)
    }

    /// ノード`id`の割当を解放し、可能なら兄弟とのマージを行う.
    pub fn free(&mut self, id: u32) {
        debug_assert_eq!(self.value(id), self.unusable);
        self.set_value(id, self.depth_of(id));
        self.update_parents_free(id);
    }

    /// ノード`id`の(不変な)深さを返す.
    pub fn depth_of(&self, id: u32) -> u8 {
        self.depth[id as usize]
    }

    /// ノード`id`がそのノード自身への割当によってunusableかどうかを返す.
    pub fn is_unusable(&self, id: u32) -> bool {
        self.value(id) == self.unusable
    }

    fn value(&self, id: u32) -> u8 {
        self.state[id as usize]
    }

    fn set_value(&mut self, id: u32, val: u8) {
        self.state[id as usize] = val;
    }

    // 割当後、割当ノードの全先祖について
    // 「状態値 = 子二つの状態値の最小値」を再確立する.
    fn update_parents_alloc(&mut self, mut id: u32) {
        while id > 1 {
            let parent = id >> 1;
            let val1 = self.value(id);
            let val2 = self.value(id ^ 1);
            self.set_value(parent, val1.min(val2));
            id = parent;
        }
    }

    // 解放後の上昇走査.
    //
    // ある深さで子二つがどちらも丸ごと空きになった場合には、
    // 親を未割当状態(深さ値そのもの)へ戻すことで、二倍サイズの割当を再び可能にする.
    fn update_parents_free(&mut self, mut id: u32) {
        let mut log_child = self.depth_of(id) + 1;
        while id > 1 {
            let parent = id >> 1;
            let val1 = self.value(id);
            let val2 = self.value(id ^ 1);
            log_child -= 1; // 一周目は解放ノードの深さ、以降は一つずつ浅くなる

            if val1 == log_child && val2 == log_child {
                self.set_value(parent, log_child - 1);
            } else {
                self.set_value(parent, val1.min(val2));
            }
            id = parent;
        }
    }
}
