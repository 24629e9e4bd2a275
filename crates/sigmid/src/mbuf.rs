//! Cursor byte buffers over slab storage.
//!
//! An [MBuf] owns a slab block and a pair of cursors: writes land at `pos` and push `end`
//! forward, reads consume from `pos` toward `end`, and `pos <= end <= size` holds throughout.
//! Storage is reference counted, so [MBuf::alloc_ref] can hand out a second buffer over the same
//! bytes with its own cursors — the way a transaction layer keeps a parked copy of a message
//! while the parser walks another.  Growth reallocates through the pool; buffers that shared the
//! old storage keep it alive and simply stop seeing new writes, same as the C middleware.
//!
//! [MBufView] is the borrowed window replacing the old non-owning alias tricks: it cannot
//! outlive the buffer it looks into.

use std::sync::Arc;

use premem::{PreMem, Sharing, SlabRef};

use crate::error::{Error, Result};
use crate::pl::Pl;

pub struct MBuf {
    storage: SlabRef,
    pool: Arc<PreMem>,
    size: usize,
    pos: usize,
    end: usize,
}

impl MBuf {
    /// Allocate a buffer of `size` bytes backed by the pool.
    pub fn alloc(pool: &Arc<PreMem>, size: usize) -> Result<MBuf> {
        Self::alloc_with(pool, size, Sharing::SingleThread)
    }

    /// Same, but the storage carries a per-object mutex so refs may cross threads.
    pub fn alloc_shared(pool: &Arc<PreMem>, size: usize) -> Result<MBuf> {
        Self::alloc_with(pool, size, Sharing::Shared)
    }

    fn alloc_with(pool: &Arc<PreMem>, size: usize, sharing: Sharing) -> Result<MBuf> {
        let storage = pool.alloc(size, None, sharing)?;
        Ok(MBuf {
            storage,
            pool: pool.clone(),
            size,
            pos: 0,
            end: 0,
        })
    }

    /// A second buffer over the same storage: the refcount goes up, the cursors are this
    /// buffer's current ones, and each side moves its own from here on.
    pub fn alloc_ref(&self) -> Result<MBuf> {
        let storage = self.storage.clone_ref().ok_or(Error::NullPointer)?;
        Ok(MBuf {
            storage,
            pool: self.pool.clone(),
            size: self.size,
            pos: self.pos,
            end: self.end,
        })
    }

    /// Borrowed window over `start..start+len` of the readable bytes.
    pub fn view(&self, start: usize, len: usize) -> Result<MBufView<'_>> {
        if start + len > self.end {
            return Err(Error::invalid(format!(
                "view {start}+{len} exceeds end {}",
                self.end
            )));
        }
        Ok(MBufView {
            bytes: &self.bytes()[start..start + len],
            pos: 0,
        })
    }

    /// Borrowed window over the unread remainder.
    pub fn view_current(&self) -> MBufView<'_> {
        MBufView {
            bytes: &self.bytes()[self.pos..self.end],
            pos: 0,
        }
    }

    /// Read a whole file, doubling the buffer as needed, and null-terminate the contents the way
    /// the C-side consumers expected.  `end` covers the file bytes only.
    pub fn read_file(pool: &Arc<PreMem>, path: &std::path::Path, init_size: usize) -> Result<MBuf> {
        use std::io::Read;

        let mut file = std::fs::File::open(path)
            .map_err(|e| Error::system(format!("open {}: {e}", path.display())))?;
        let mut mbuf = Self::alloc(pool, init_size.max(1))?;
        loop {
            let spare = mbuf.size - mbuf.end;
            if spare == 0 {
                mbuf.grow(mbuf.size + 1)?;
                continue;
            }
            let dst = unsafe {
                std::slice::from_raw_parts_mut(
                    mbuf.storage.shared_ptr_mut().add(mbuf.end),
                    spare,
                )
            };
            let n = file
                .read(dst)
                .map_err(|e| Error::system(format!("read {}: {e}", path.display())))?;
            if n == 0 {
                break;
            }
            mbuf.end += n;
        }

        if mbuf.end == mbuf.size {
            mbuf.grow(mbuf.size + 1)?;
        }
        unsafe { *mbuf.storage.shared_ptr_mut().add(mbuf.end) = 0 };
        Ok(mbuf)
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    /// All written bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.storage.bytes()[..self.end]
    }

    /// Unread bytes.
    pub fn cur_bytes(&self) -> &[u8] {
        &self.storage.bytes()[self.pos..self.end]
    }

    pub fn byte_at(&self, at: usize) -> Option<u8> {
        self.storage.bytes().get(at).copied().filter(|_| at < self.end)
    }

    pub fn set_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.end);
        self.pos = pos.min(self.end);
    }

    pub fn advance(&mut self, n: isize) {
        let new = self.pos as isize + n;
        self.pos = new.clamp(0, self.end as isize) as usize;
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
        self.end = 0;
    }

    pub fn skip_to_end(&mut self) {
        self.pos = self.end;
    }

    fn grow(&mut self, needed: usize) -> Result<()> {
        let mut new_size = self.size.max(1);
        while new_size < needed {
            new_size *= 2;
        }
        if new_size > premem::MAX_ALLOC_SIZE {
            return Err(Error::MemoryAllocFailure);
        }
        // Old storage stays alive inside any buffer still holding a ref to it.
        let old = self.storage.clone_ref().ok_or(Error::NullPointer)?;
        self.storage = self.pool.realloc(old, new_size)?;
        self.size = new_size;
        Ok(())
    }

    /// The write primitive everything else goes through: copy at `pos`, push `end`, optionally
    /// advance `pos` past what was written.
    pub fn write_buf(&mut self, data: &[u8], advance: bool) -> Result<()> {
        let needed = self.pos + data.len();
        if needed > self.size {
            self.grow(needed)?;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.storage.shared_ptr_mut().add(self.pos),
                data.len(),
            );
        }
        self.end = self.end.max(needed);
        if advance {
            self.pos = needed;
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8, advance: bool) -> Result<()> {
        self.write_buf(&[v], advance)
    }

    pub fn write_u16(&mut self, v: u16, advance: bool) -> Result<()> {
        self.write_buf(&v.to_ne_bytes(), advance)
    }

    pub fn write_u32(&mut self, v: u32, advance: bool) -> Result<()> {
        self.write_buf(&v.to_ne_bytes(), advance)
    }

    pub fn write_u64(&mut self, v: u64, advance: bool) -> Result<()> {
        self.write_buf(&v.to_ne_bytes(), advance)
    }

    pub fn write_u8_str(&mut self, v: u8, advance: bool) -> Result<()> {
        self.write_str(&v.to_string(), advance)
    }

    pub fn write_u16_str(&mut self, v: u16, advance: bool) -> Result<()> {
        self.write_str(&v.to_string(), advance)
    }

    pub fn write_u32_str(&mut self, v: u32, advance: bool) -> Result<()> {
        self.write_str(&v.to_string(), advance)
    }

    pub fn write_u64_str(&mut self, v: u64, advance: bool) -> Result<()> {
        self.write_str(&v.to_string(), advance)
    }

    pub fn write_str(&mut self, s: &str, advance: bool) -> Result<()> {
        self.write_buf(s.as_bytes(), advance)
    }

    pub fn write_pl(&mut self, pl: &Pl<'_>, advance: bool) -> Result<()> {
        self.write_buf(pl.as_bytes(), advance)
    }

    /// Copy from `src` up to and including the first occurrence of `pattern`.
    pub fn write_until(&mut self, src: &Pl<'_>, pattern: &Pl<'_>, advance: bool) -> Result<()> {
        let at = src
            .find(pattern.as_bytes())
            .ok_or_else(|| Error::invalid("write_until pattern not found in source"))?;
        self.write_buf(&src.as_bytes()[..at + pattern.len()], advance)
    }

    /// Copy `src` bytes `start..stop`.
    pub fn write_range(
        &mut self,
        src: &MBuf,
        start: usize,
        stop: usize,
        advance: bool,
    ) -> Result<()> {
        if start > stop || stop > src.end {
            return Err(Error::invalid(format!(
                "range {start}..{stop} outside source end {}",
                src.end
            )));
        }
        self.write_buf(&src.bytes()[start..stop], advance)
    }

    pub fn set_zero(&mut self, n: usize, advance: bool) -> Result<()> {
        self.fill(0, n, advance)
    }

    pub fn fill(&mut self, c: u8, n: usize, advance: bool) -> Result<()> {
        let needed = self.pos + n;
        if needed > self.size {
            self.grow(needed)?;
        }
        unsafe {
            std::ptr::write_bytes(self.storage.shared_ptr_mut().add(self.pos), c, n);
        }
        self.end = self.end.max(needed);
        if advance {
            self.pos = needed;
        }
        Ok(())
    }

    /// Slide the bytes from `pos` to `end` by `shift` (negative moves toward the start), for
    /// in-place header surgery.  `pos` stays, `end` moves with the data.
    pub fn shift(&mut self, shift: isize) -> Result<()> {
        let new_pos = self.pos as isize + shift;
        let new_end = self.end as isize + shift;
        if new_pos < 0 || new_end as usize > self.size {
            return Err(Error::invalid(format!("shift {shift} leaves the buffer")));
        }
        let len = self.remaining();
        unsafe {
            let base = self.storage.shared_ptr_mut();
            std::ptr::copy(base.add(self.pos), base.add(new_pos as usize), len);
        }
        self.end = new_end as usize;
        Ok(())
    }

    /// Write `pl` minus one interior section: everything before `skip` plus everything after it.
    /// The section must actually lie inside `pl`.
    pub fn write_pl_skip_section(
        &mut self,
        pl: &Pl<'_>,
        skip: &Pl<'_>,
        advance: bool,
    ) -> Result<()> {
        let at = pl
            .find(skip.as_bytes())
            .ok_or_else(|| Error::invalid("skip section not found in source"))?;
        self.write_buf(&pl.as_bytes()[..at], false)?;
        let pos = self.pos;
        self.pos += at;
        self.write_buf(&pl.as_bytes()[at + skip.len()..], false)?;
        self.pos = pos;
        if advance {
            self.pos += pl.len() - skip.len();
        }
        Ok(())
    }

    /// Overwrite already-written bytes in place; cursors do not move.
    pub fn overwrite_at(&mut self, at: usize, data: &[u8]) -> Result<()> {
        if at + data.len() > self.end {
            return Err(Error::invalid("overwrite beyond written bytes"));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.storage.shared_ptr_mut().add(at),
                data.len(),
            );
        }
        Ok(())
    }

    fn read_exact(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(Error::invalid(format!(
                "read of {n} bytes with {} remaining",
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.storage.bytes()[start..start + n])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_ne_bytes(self.read_exact(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_ne_bytes(self.read_exact(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_ne_bytes(self.read_exact(8)?.try_into().unwrap()))
    }

    pub fn read_buf(&mut self, out: &mut [u8]) -> Result<()> {
        let src = self.read_exact(out.len())?;
        out.copy_from_slice(src);
        Ok(())
    }

    pub fn read_pl(&mut self, n: usize) -> Result<Pl<'_>> {
        Ok(Pl::new(self.read_exact(n)?))
    }

    /// Case-insensitive substring search from `pos`; on a hit `pos` moves to the match start and
    /// the index is returned.  On a miss `pos` is unchanged.
    pub fn find_match(&mut self, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() {
            return None;
        }
        let at = Pl::new(self.cur_bytes()).find_nocase(pattern)?;
        self.pos += at;
        Some(self.pos)
    }

    /// Scan from `pos` for `tag1 … tag2` and return the bytes between the two tags, optionally
    /// with outer spaces and tabs trimmed.  `pos` ends up just past `tag2`.
    pub fn find_value(&mut self, tag1: u8, tag2: u8, excl_space: bool) -> Option<Pl<'_>> {
        while self.pos < self.end {
            if self.storage.bytes()[self.pos] != tag1 {
                self.pos += 1;
                continue;
            }
            self.pos += 1;
            let start = self.pos;
            while self.pos < self.end {
                if self.storage.bytes()[self.pos] == tag2 {
                    self.pos += 1;
                    let value = Pl::new(&self.storage.bytes()[start..self.pos - 1]);
                    return Some(if excl_space {
                        // Spaces and tabs only; line breaks inside a value are content.
                        let b = value.as_bytes();
                        let s = b.iter().position(|&c| c != b' ' && c != b'\t').unwrap_or(b.len());
                        let e = b.iter().rposition(|&c| c != b' ' && c != b'\t').map_or(s, |i| i + 1);
                        Pl::new(&b[s..e])
                    } else {
                        value
                    });
                }
                self.pos += 1;
            }
            return None;
        }
        None
    }
}

impl std::fmt::Debug for MBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MBuf")
            .field("size", &self.size)
            .field("pos", &self.pos)
            .field("end", &self.end)
            .finish()
    }
}

/// A borrowed, cursored window into an [MBuf].
pub struct MBufView<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> MBufView<'a> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn as_pl(&self) -> Pl<'a> {
        Pl::new(self.bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| Error::invalid("view read past end"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_pl(&mut self, n: usize) -> Result<Pl<'a>> {
        if self.remaining() < n {
            return Err(Error::invalid("view read past end"));
        }
        let start = self.pos;
        self.pos += n;
        Ok(Pl::new(&self.bytes[start..start + n]))
    }
}
