//! Picture Processing Unit (C3).
//!
//! Runs a two-phase (Draw, HBlank) scanline state machine driven entirely
//! by the bus's event scheduler. A scanline's pixels are produced in one
//! shot at the Draw -> HBlank transition rather than dot-by-dot, since
//! nothing in this core needs mid-scanline raster effects beyond what the
//! per-scanline affine reference-point latch already captures.
//!
//! Supports BG modes 0-5 (text and affine backgrounds, and the three
//! bitmap modes), regular and affine sprites (including OBJ-window and
//! semi-transparent modes), BG/OBJ mosaic, WIN0/WIN1/OBJ window masking
//! with per-layer WININ/WINOUT gating, and full two-layer BLDCNT
//! alpha/brighten/darken compositing. See DESIGN.md for the affine-BG
//! vertical-mosaic scope decision.

use serde::{Deserialize, Serialize};

use crate::memory::Ram;

pub const SCREEN_WIDTH: usize = 240;
pub const SCREEN_HEIGHT: usize = 160;
const TOTAL_LINES: u16 = 228;

const CYCLES_DRAW: u32 = 960;
const CYCLES_HBLANK: u32 = 272;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Phase {
    Draw,
    HBlank,
}

pub struct PhaseTransition {
    pub hblank_irq: bool,
    pub vblank_irq: bool,
    pub vcount_irq: bool,
    pub hblank_dma: bool,
    pub vblank_dma: bool,
    pub next_phase_length: u32,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ppu {
    regs: [u8; 0x58],
    scanline: u16,
    phase: Phase,
    #[serde(skip, default = "default_framebuffer")]
    framebuffer: Vec<u32>,
    affine_ref: [(i32, i32); 2],
}

fn default_framebuffer() -> Vec<u32> {
    vec![0; SCREEN_WIDTH * SCREEN_HEIGHT]
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            regs: [0; 0x58],
            scanline: 0,
            phase: Phase::Draw,
            framebuffer: default_framebuffer(),
            affine_ref: [(0, 0); 2],
        }
    }

    pub fn phase_length(&self) -> u32 {
        match self.phase {
            Phase::Draw => CYCLES_DRAW,
            Phase::HBlank => CYCLES_HBLANK,
        }
    }

    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer
    }

    // ---- register access ---------------------------------------------------

    fn read16(&self, offset: usize) -> u16 {
        self.regs[offset] as u16 | ((self.regs[offset + 1] as u16) << 8)
    }

    fn write16(&mut self, offset: usize, value: u16) {
        self.regs[offset] = value as u8;
        self.regs[offset + 1] = (value >> 8) as u8;
    }

    pub fn read8(&self, offset: usize) -> u8 {
        match offset {
            0x06 => (self.scanline & 0xFF) as u8,
            0x07 => 0,
            _ if offset < self.regs.len() => self.regs[offset],
            _ => 0,
        }
    }

    pub fn write8(&mut self, offset: usize, value: u8) {
        match offset {
            0x04 => {
                // DISPSTAT low byte: bits 0-2 (VBlank/HBlank/VCount flags) are
                // hardware-driven and not writable; bits 3-5 are IRQ enables.
                let writable = value & 0b1111_1000;
                self.regs[0x04] = (self.regs[0x04] & 0b0000_0111) | writable;
            }
            0x06 | 0x07 => {}
            _ if offset < self.regs.len() => self.regs[offset] = value,
            _ => {}
        }
    }

    fn dispcnt(&self) -> u16 {
        self.read16(0x00)
    }

    fn dispstat(&self) -> u16 {
        self.read16(0x04)
    }

    fn set_dispstat_flag(&mut self, bit: u8, set: bool) {
        let mut v = self.dispstat();
        if set {
            v |= 1 << bit;
        } else {
            v &= !(1 << bit);
        }
        self.write16(0x04, v);
    }

    fn bg_cnt(&self, bg: usize) -> u16 {
        self.read16(0x08 + bg * 2)
    }

    fn bg_scroll(&self, bg: usize) -> (u16, u16) {
        let h = self.read16(0x10 + bg * 4) & 0x1FF;
        let v = self.read16(0x12 + bg * 4) & 0x1FF;
        (h, v)
    }

    fn bg_affine_params(&self, bg: usize) -> (i16, i16, i16, i16, i32, i32) {
        let base = 0x20 + (bg - 2) * 0x10;
        let pa = self.read16(base) as i16;
        let pb = self.read16(base + 2) as i16;
        let pc = self.read16(base + 4) as i16;
        let pd = self.read16(base + 6) as i16;
        let x = sign_extend_28(self.read16(base + 8) as u32 | ((self.read16(base + 10) as u32) << 16));
        let y = sign_extend_28(self.read16(base + 12) as u32 | ((self.read16(base + 14) as u32) << 16));
        (pa, pb, pc, pd, x, y)
    }

    fn win_h(&self, win: usize) -> (u8, u8) {
        let v = self.read16(0x40 + win * 2);
        ((v >> 8) as u8, v as u8)
    }

    fn win_v(&self, win: usize) -> (u8, u8) {
        let v = self.read16(0x44 + win * 2);
        ((v >> 8) as u8, v as u8)
    }

    fn winin(&self) -> u16 {
        self.read16(0x48)
    }

    fn winout(&self) -> u16 {
        self.read16(0x4A)
    }

    fn bldcnt(&self) -> u16 {
        self.read16(0x50)
    }

    fn bldalpha(&self) -> u16 {
        self.read16(0x52)
    }

    fn bldy(&self) -> u8 {
        self.read8(0x54) & 0x1F
    }

    /// MOSAIC (0x4C): (bg_h, bg_v, obj_h, obj_v) sizes in pixels (register
    /// field value + 1; 0 means "no mosaic" on that axis).
    fn mosaic(&self) -> (u32, u32, u32, u32) {
        let v = self.read16(0x4C);
        (
            (v & 0xF) as u32 + 1,
            ((v >> 4) & 0xF) as u32 + 1,
            ((v >> 8) & 0xF) as u32 + 1,
            ((v >> 12) & 0xF) as u32 + 1,
        )
    }

    // ---- phase machine -------------------------------------------------------

    pub fn advance_phase(&mut self, vram: &Ram, oam: &Ram, pram: &Ram) -> PhaseTransition {
        match self.phase {
            Phase::Draw => self.enter_hblank(vram, oam, pram),
            Phase::HBlank => self.enter_next_line(),
        }
    }

    fn enter_hblank(&mut self, vram: &Ram, oam: &Ram, pram: &Ram) -> PhaseTransition {
        if (self.scanline as usize) < SCREEN_HEIGHT {
            self.render_scanline(vram, oam, pram);
        }
        self.phase = Phase::HBlank;
        self.set_dispstat_flag(1, true);
        let hblank_irq = self.dispstat() & (1 << 4) != 0;
        // HBlank DMA only fires on the 160 visible lines, not during VBlank.
        let hblank_dma = (self.scanline as usize) < SCREEN_HEIGHT;
        PhaseTransition {
            hblank_irq,
            vblank_irq: false,
            vcount_irq: false,
            hblank_dma,
            vblank_dma: false,
            next_phase_length: self.phase_length(),
        }
    }

    fn enter_next_line(&mut self) -> PhaseTransition {
        self.set_dispstat_flag(1, false);
        self.scanline = (self.scanline + 1) % TOTAL_LINES;
        self.phase = Phase::Draw;

        let mut vblank_irq = false;
        let mut vblank_dma = false;
        if self.scanline == SCREEN_HEIGHT as u16 {
            self.set_dispstat_flag(0, true);
            vblank_irq = self.dispstat() & (1 << 3) != 0;
            vblank_dma = true;
            self.latch_affine_reference();
        } else if self.scanline == 0 {
            self.set_dispstat_flag(0, false);
        } else if (self.scanline as usize) < SCREEN_HEIGHT {
            self.advance_affine_reference();
        }

        let vcount_target = (self.dispstat() >> 8) as u16;
        let vcount_match = self.scanline == vcount_target;
        self.set_dispstat_flag(2, vcount_match);
        let vcount_irq = vcount_match && self.dispstat() & (1 << 5) != 0;

        PhaseTransition {
            hblank_irq: false,
            vblank_irq,
            vcount_irq,
            hblank_dma: false,
            vblank_dma,
            next_phase_length: self.phase_length(),
        }
    }

    fn latch_affine_reference(&mut self) {
        for bg in 0..2 {
            let (_, _, _, _, x, y) = self.bg_affine_params(bg + 2);
            self.affine_ref[bg] = (x, y);
        }
    }

    /// Integrates one scanline's worth of PB/PD into the current-point
    /// registers. Runs on every visible-line advance other than the one that
    /// just re-latched from BGxX/Y, so the accumulated value carries the
    /// vertical component of rotation/scaling into the next line's sample.
    fn advance_affine_reference(&mut self) {
        for bg in 0..2 {
            let (_, pb, _, pd, _, _) = self.bg_affine_params(bg + 2);
            let (x, y) = self.affine_ref[bg];
            self.affine_ref[bg] = (x + pb as i32, y + pd as i32);
        }
    }

    // ---- rendering -------------------------------------------------------

    fn render_scanline(&mut self, vram: &Ram, oam: &Ram, pram: &Ram) {
        let y = self.scanline as usize;
        let mode = self.dispcnt() & 0x7;

        let mut bg_pixel: [[Option<u32>; SCREEN_WIDTH]; 4] = [[None; SCREEN_WIDTH]; 4];
        match mode {
            0 => {
                for bg in 0..4 {
                    self.render_text_bg(vram, pram, &mut bg_pixel[bg], bg);
                }
            }
            1 => {
                self.render_text_bg(vram, pram, &mut bg_pixel[0], 0);
                self.render_text_bg(vram, pram, &mut bg_pixel[1], 1);
                self.render_affine_bg(vram, pram, &mut bg_pixel[2], 2);
            }
            2 => {
                self.render_affine_bg(vram, pram, &mut bg_pixel[2], 2);
                self.render_affine_bg(vram, pram, &mut bg_pixel[3], 3);
            }
            3 => self.render_bitmap_mode3(vram, &mut bg_pixel[2]),
            4 => self.render_bitmap_mode4(vram, pram, &mut bg_pixel[2]),
            5 => self.render_bitmap_mode5(vram, pram, &mut bg_pixel[2]),
            _ => log::error!("reserved PPU mode {} selected; scanline {} left blank", mode, y),
        }

        let mut obj_color = [None; SCREEN_WIDTH];
        let mut obj_priority = [i32::MAX; SCREEN_WIDTH];
        let mut obj_semi = [false; SCREEN_WIDTH];
        let mut obj_window = [false; SCREEN_WIDTH];
        if self.dispcnt() & (1 << 12) != 0 {
            self.render_sprites(vram, oam, pram, &mut obj_color, &mut obj_priority, &mut obj_semi, &mut obj_window);
        }

        let bg_priority: [i32; 4] = [
            (self.bg_cnt(0) & 0x3) as i32,
            (self.bg_cnt(1) & 0x3) as i32,
            (self.bg_cnt(2) & 0x3) as i32,
            (self.bg_cnt(3) & 0x3) as i32,
        ];

        let row = self.compose_scanline(pram, &bg_pixel, &bg_priority, &obj_color, &obj_priority, &obj_semi, &obj_window);
        self.framebuffer[y * SCREEN_WIDTH..(y + 1) * SCREEN_WIDTH].copy_from_slice(&row);
    }

    fn render_text_bg(&self, vram: &Ram, pram: &Ram, buf: &mut [Option<u32>; SCREEN_WIDTH], bg: usize) {
        if self.dispcnt() & (1 << (8 + bg)) == 0 {
            return;
        }
        let cnt = self.bg_cnt(bg);
        let char_base = ((cnt >> 2) & 0x3) as u32 * 0x4000;
        let screen_base = ((cnt >> 8) & 0x1F) as u32 * 0x800;
        let bpp8 = cnt & (1 << 7) != 0;
        let size = (cnt >> 14) & 0x3;
        let (hofs, vofs) = self.bg_scroll(bg);
        let y = self.scanline as i32;

        let (mos_h, mos_v, _, _) = self.mosaic();
        let mosaic_on = cnt & (1 << 6) != 0;
        let eff_y = if mosaic_on { snap_mosaic(y, mos_v) } else { y };
        let map_y = (eff_y + vofs as i32) as u32;

        for x in 0..SCREEN_WIDTH {
            let eff_x = if mosaic_on { snap_mosaic(x as i32, mos_h) } else { x as i32 };
            let map_x = (eff_x + hofs as i32) as u32;
            buf[x] = text_bg_pixel(vram, pram, screen_base, char_base, bpp8, size, map_x, map_y);
        }
    }

    fn render_affine_bg(&self, vram: &Ram, pram: &Ram, buf: &mut [Option<u32>; SCREEN_WIDTH], bg: usize) {
        if self.dispcnt() & (1 << (8 + bg)) == 0 {
            return;
        }
        let cnt = self.bg_cnt(bg);
        let char_base = ((cnt >> 2) & 0x3) as u32 * 0x4000;
        let screen_base = ((cnt >> 8) & 0x1F) as u32 * 0x800;
        let size_bit = (cnt >> 14) & 0x3;
        let map_size = 128u32 << size_bit;
        let wrap = cnt & (1 << 13) != 0;

        let (pa, _pb, pc, _pd, _x0, _y0) = self.bg_affine_params(bg);
        let (ref_x, ref_y) = self.affine_ref[bg - 2];

        let (mos_h, _, _, _) = self.mosaic();
        let mosaic_on = cnt & (1 << 6) != 0;

        for x in 0..SCREEN_WIDTH {
            let dx = if mosaic_on { snap_mosaic(x as i32, mos_h) } else { x as i32 };
            let mut tx = (ref_x + dx * pa as i32) >> 8;
            let mut ty = (ref_y + dx * pc as i32) >> 8;
            if wrap {
                tx = tx.rem_euclid(map_size as i32);
                ty = ty.rem_euclid(map_size as i32);
            } else if tx < 0 || ty < 0 || tx >= map_size as i32 || ty >= map_size as i32 {
                continue;
            }
            let tiles_per_row = map_size / 8;
            let tile_x = (tx / 8) as u32 % tiles_per_row;
            let tile_y = (ty / 8) as u32 % tiles_per_row;
            let tile_index = vram.read(screen_base + tile_y * tiles_per_row + tile_x);
            let px = (tx % 8) as u32;
            let py = (ty % 8) as u32;
            let byte = vram.read(char_base + tile_index as u32 * 64 + py * 8 + px);
            if byte == 0 {
                continue;
            }
            buf[x] = Some(palette_color(pram, byte as u32));
        }
    }

    fn render_bitmap_mode3(&self, vram: &Ram, buf: &mut [Option<u32>; SCREEN_WIDTH]) {
        let y = self.scanline as u32;
        for x in 0..SCREEN_WIDTH {
            let offset = (y * SCREEN_WIDTH as u32 + x as u32) * 2;
            let lo = vram.read(offset) as u16;
            let hi = vram.read(offset + 1) as u16;
            buf[x] = Some(bgr555_to_rgb888(lo | (hi << 8)));
        }
    }

    fn render_bitmap_mode4(&self, vram: &Ram, pram: &Ram, buf: &mut [Option<u32>; SCREEN_WIDTH]) {
        let y = self.scanline as u32;
        let frame_offset = if self.dispcnt() & (1 << 4) != 0 { 0xA000u32 } else { 0 };
        for x in 0..SCREEN_WIDTH {
            let idx = vram.read(frame_offset + y * SCREEN_WIDTH as u32 + x as u32);
            buf[x] = Some(palette_color(pram, idx as u32));
        }
    }

    fn render_bitmap_mode5(&self, vram: &Ram, pram: &Ram, buf: &mut [Option<u32>; SCREEN_WIDTH]) {
        const W: u32 = 160;
        const H: u32 = 128;
        let y = self.scanline as u32;
        let frame_offset = if self.dispcnt() & (1 << 4) != 0 { 0xA000u32 } else { 0 };
        if y >= H {
            return;
        }
        for x in 0..SCREEN_WIDTH {
            if (x as u32) >= W {
                continue;
            }
            let offset = frame_offset + (y * W + x as u32) * 2;
            let lo = vram.read(offset) as u16;
            let hi = vram.read(offset + 1) as u16;
            buf[x] = Some(bgr555_to_rgb888(lo | (hi << 8)));
        }
        let _ = pram;
    }

    /// Rasterises OAM entries 127 down to 0 into shared per-pixel OBJ buffers
    /// so that, at equal `priority`, the lowest OAM index (painted last) wins
    /// (§4.6: "OBJ0 overlays OBJ127"). `obj_mode == 2` ("window") sprites
    /// never write colour, only the OBJ-window mask bit. Affine sprites (the
    /// `affine` attribute bit) sample through the 2x2 PA/PB/PC/PD matrix
    /// selected by their parameter-group index instead of the plain
    /// hflip/vflip tiling non-affine sprites use; OBJ mosaic snaps the
    /// screen coordinates used for sampling down to a `(h+1)x(v+1)` grid
    /// before either path runs.
    fn render_sprites(
        &self,
        vram: &Ram,
        oam: &Ram,
        pram: &Ram,
        obj_color: &mut [Option<u32>; SCREEN_WIDTH],
        obj_priority: &mut [i32; SCREEN_WIDTH],
        obj_semi: &mut [bool; SCREEN_WIDTH],
        obj_window: &mut [bool; SCREEN_WIDTH],
    ) {
        let y = self.scanline as i32;
        let mapping_1d = self.dispcnt() & (1 << 6) != 0;
        let (_, _, mos_obj_h, mos_obj_v) = self.mosaic();

        for entry in (0..128).rev() {
            let base = entry * 8;
            let attr0 = oam.read(base) as u16 | ((oam.read(base + 1) as u16) << 8);
            let attr1 = oam.read(base + 2) as u16 | ((oam.read(base + 3) as u16) << 8);
            let attr2 = oam.read(base + 4) as u16 | ((oam.read(base + 5) as u16) << 8);

            let obj_mode = (attr0 >> 8) & 0x3;
            let affine = attr0 & (1 << 8) != 0;
            let double_size = affine && attr0 & (1 << 9) != 0;
            if !affine && attr0 & (1 << 9) != 0 {
                continue; // disabled (non-affine, "double size" bit reused as hide)
            }
            if obj_mode == 3 {
                continue; // prohibited
            }

            let shape = (attr0 >> 14) & 0x3;
            if shape == 3 {
                continue; // prohibited
            }
            let size_sel = (attr1 >> 14) & 0x3;
            let (w, h) = sprite_dimensions(shape, size_sel);
            let bbox_w = if double_size { w * 2 } else { w };
            let bbox_h = if double_size { h * 2 } else { h };

            let obj_y = (attr0 & 0xFF) as i32;
            let sprite_y = if obj_y + (bbox_h as i32) > 256 { obj_y - 256 } else { obj_y };
            if y < sprite_y || y >= sprite_y + bbox_h as i32 {
                continue;
            }

            let obj_x_raw = (attr1 & 0x1FF) as i32;
            let sprite_x = if obj_x_raw >= 240 { obj_x_raw - 512 } else { obj_x_raw };

            let bpp8 = attr0 & (1 << 13) != 0;
            let tile_index = attr2 & 0x3FF;
            let priority = ((attr2 >> 10) & 0x3) as i32;
            let palette_bank = (attr2 >> 12) & 0xF;
            let hflip = !affine && attr1 & (1 << 12) != 0;
            let vflip = !affine && attr1 & (1 << 13) != 0;
            let is_window = obj_mode == 2;
            let is_semi = obj_mode == 1;
            let mosaic_on = attr0 & (1 << 12) != 0;

            let eff_y = if mosaic_on { snap_mosaic(y, mos_obj_v) } else { y };
            let row_in_sprite = eff_y - sprite_y;

            let affine_params = if affine {
                Some(sprite_affine_params(oam, (attr1 >> 9) & 0x1F))
            } else {
                None
            };
            // Non-affine row is fixed for the whole sprite; affine recomputes
            // a (src_col, src_row) pair per column from the matrix instead.
            let src_row_fixed = if vflip { h as i32 - 1 - row_in_sprite } else { row_in_sprite };

            for col in 0..bbox_w as i32 {
                let px = sprite_x + col;
                if px < 0 || px as usize >= SCREEN_WIDTH {
                    continue;
                }
                let eff_px = if mosaic_on { snap_mosaic(px, mos_obj_h) } else { px };
                let eff_col = eff_px - sprite_x;

                let (src_col, src_row) = if let Some((pa, pb, pc, pd)) = affine_params {
                    let dx = eff_col - bbox_w as i32 / 2;
                    let dy = row_in_sprite - bbox_h as i32 / 2;
                    let tx = ((pa as i32 * dx + pb as i32 * dy) >> 8) + w as i32 / 2;
                    let ty = ((pc as i32 * dx + pd as i32 * dy) >> 8) + h as i32 / 2;
                    (tx, ty)
                } else {
                    let src_col = if hflip { w as i32 - 1 - eff_col } else { eff_col };
                    (src_col, src_row_fixed)
                };
                if src_col < 0 || src_col >= w as i32 || src_row < 0 || src_row >= h as i32 {
                    continue;
                }
                let tile_col = (src_col / 8) as u32;
                let tile_row = (src_row / 8) as u32;
                let tiles_wide = w / 8;
                let tile_number = if mapping_1d {
                    tile_index as u32 + tile_row * tiles_wide + tile_col
                } else {
                    let stride = if bpp8 { 16 } else { 32 };
                    tile_index as u32 + tile_row * stride + tile_col
                };
                let tile_bytes = if bpp8 { 64 } else { 32 };
                let tile_base = 0x10000u32 + tile_number * tile_bytes;
                let px_in_tile = (src_col % 8) as u32;
                let py_in_tile = (src_row % 8) as u32;

                let color_idx = if bpp8 {
                    vram.read(tile_base + py_in_tile * 8 + px_in_tile)
                } else {
                    let byte = vram.read(tile_base + py_in_tile * 4 + px_in_tile / 2);
                    if px_in_tile % 2 == 0 {
                        byte & 0xF
                    } else {
                        byte >> 4
                    }
                };
                if color_idx == 0 {
                    continue;
                }
                let px_usize = px as usize;
                if is_window {
                    obj_window[px_usize] = true;
                    continue;
                }
                if priority <= obj_priority[px_usize] {
                    let color = if bpp8 {
                        sprite_palette_color(pram, color_idx as u32)
                    } else {
                        sprite_palette_color(pram, palette_bank as u32 * 16 + color_idx as u32)
                    };
                    obj_color[px_usize] = Some(color);
                    obj_priority[px_usize] = priority;
                    obj_semi[px_usize] = is_semi;
                }
            }
        }
    }

    /// Per-pixel window gate, then priority/layer scan (§4.6: priority
    /// levels 3..0, BG3,BG2,BG1,BG0 then OBJ at each level — so among equal
    /// priorities OBJ is topmost, then BG0..BG3 in that order) picking the
    /// top two non-transparent layers and applying the colour special
    /// effect selected by BLDCNT.
    #[allow(clippy::too_many_arguments)]
    fn compose_scanline(
        &self,
        pram: &Ram,
        bg_pixel: &[[Option<u32>; SCREEN_WIDTH]; 4],
        bg_priority: &[i32; 4],
        obj_color: &[Option<u32>; SCREEN_WIDTH],
        obj_priority: &[i32; SCREEN_WIDTH],
        obj_semi: &[bool; SCREEN_WIDTH],
        obj_window: &[bool; SCREEN_WIDTH],
    ) -> [u32; SCREEN_WIDTH] {
        let dispcnt = self.dispcnt();
        let win0_on = dispcnt & (1 << 13) != 0;
        let win1_on = dispcnt & (1 << 14) != 0;
        let objwin_on = dispcnt & (1 << 15) != 0;
        let any_window = win0_on || win1_on || objwin_on;
        let winin = self.winin();
        let winout = self.winout();
        let y = self.scanline as u8;

        let bldcnt = self.bldcnt();
        let mode = (bldcnt >> 6) & 0x3;
        let eva = (self.bldalpha() & 0x1F).min(16) as u32;
        let evb = ((self.bldalpha() >> 8) & 0x1F).min(16) as u32;
        let evy = (self.bldy() as u32).min(16);
        let backdrop = palette_color(pram, 0);

        let mut out = [0u32; SCREEN_WIDTH];
        for x in 0..SCREEN_WIDTH {
            let enable_mask: u16 = if !any_window {
                0x3F
            } else if win0_on && point_in_window(self.win_h(0), self.win_v(0), x as u8, y) {
                winin & 0x3F
            } else if win1_on && point_in_window(self.win_h(1), self.win_v(1), x as u8, y) {
                (winin >> 8) & 0x3F
            } else if objwin_on && obj_window[x] {
                (winout >> 8) & 0x3F
            } else {
                winout & 0x3F
            };

            // (priority, draw-rank, color, bldcnt-target-bit); rank 0 (OBJ) is
            // topmost among equal priorities, then BG0..BG3.
            let mut candidates: [(i32, i32, u32, u32); 5] = [(i32::MAX, 0, 0, 0); 5];
            let mut n = 0;
            if enable_mask & (1 << 4) != 0 {
                if let Some(c) = obj_color[x] {
                    candidates[n] = (obj_priority[x], 0, c, 4);
                    n += 1;
                }
            }
            for bg in 0..4 {
                if enable_mask & (1 << bg) != 0 {
                    if let Some(c) = bg_pixel[bg][x] {
                        candidates[n] = (bg_priority[bg], (bg + 1) as i32, c, bg as u32);
                        n += 1;
                    }
                }
            }
            candidates[..n].sort_by_key(|c| (c.0, c.1));

            let (top_color, top_bit, top_is_obj) =
                candidates.first().filter(|_| n > 0).map(|c| (c.2, c.3, c.3 == 4)).unwrap_or((backdrop, 5, false));
            let (next_color, next_bit) =
                candidates.get(1).filter(|_| n > 1).map(|c| (c.2, c.3)).unwrap_or((backdrop, 5));

            let sfx_on = enable_mask & (1 << 5) != 0;
            let semi = top_is_obj && obj_semi[x];
            let first_target = bldcnt & (1 << top_bit) != 0;
            let second_target = (bldcnt >> 8) & (1 << next_bit) != 0;

            out[x] = if !sfx_on {
                top_color
            } else if semi && second_target {
                blend_alpha(top_color, next_color, eva, evb)
            } else if mode == 1 && first_target && second_target {
                blend_alpha(top_color, next_color, eva, evb)
            } else if mode == 2 && first_target {
                blend_brightness(top_color, evy, true)
            } else if mode == 3 && first_target {
                blend_brightness(top_color, evy, false)
            } else {
                top_color
            };
        }
        out
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

/// Snaps a screen coordinate down to the nearest multiple of `size`,
/// reproducing the "solid mosaic block" effect (§4.6 design notes): every
/// group of `size` consecutive pixels samples the same source texel.
fn snap_mosaic(coord: i32, size: u32) -> i32 {
    if size <= 1 {
        return coord;
    }
    let size = size as i32;
    coord.div_euclid(size) * size
}

fn sign_extend_28(value: u32) -> i32 {
    let shifted = (value << 4) as i32;
    shifted >> 4
}

fn point_in_window(h: (u8, u8), v: (u8, u8), x: u8, y: u8) -> bool {
    let (x1, x2) = h;
    let (y1, y2) = v;
    let in_x = if x1 <= x2 { x >= x1 && x < x2 } else { x >= x1 || x < x2 };
    let in_y = if y1 <= y2 { y >= y1 && y < y2 } else { y >= y1 || y < y2 };
    in_x && in_y
}

fn blend_alpha(top: u32, bottom: u32, eva: u32, evb: u32) -> u32 {
    let blend = |t: u32, b: u32| -> u32 { ((t * eva + b * evb) / 16).min(255) };
    let (tr, tg, tb) = unpack_rgb(top);
    let (br, bg, bb) = unpack_rgb(bottom);
    pack_rgb(blend(tr, br), blend(tg, bg), blend(tb, bb))
}

fn blend_brightness(color: u32, evy: u32, lighten: bool) -> u32 {
    let (r, g, b) = unpack_rgb(color);
    let adjust = |c: u32| -> u32 {
        if lighten {
            c + (((255 - c) * evy) / 16)
        } else {
            c - ((c * evy) / 16)
        }
    };
    pack_rgb(adjust(r), adjust(g), adjust(b))
}

fn unpack_rgb(c: u32) -> (u32, u32, u32) {
    ((c >> 16) & 0xFF, (c >> 8) & 0xFF, c & 0xFF)
}

fn pack_rgb(r: u32, g: u32, b: u32) -> u32 {
    (r.min(255) << 16) | (g.min(255) << 8) | b.min(255)
}

fn bgr555_to_rgb888(value: u16) -> u32 {
    let r = (value & 0x1F) as u32;
    let g = ((value >> 5) & 0x1F) as u32;
    let b = ((value >> 10) & 0x1F) as u32;
    pack_rgb(r * 255 / 31, g * 255 / 31, b * 255 / 31)
}

fn palette_color(pram: &Ram, index: u32) -> u32 {
    let offset = index * 2;
    let lo = pram.read(offset) as u16;
    let hi = pram.read(offset + 1) as u16;
    bgr555_to_rgb888(lo | (hi << 8))
}

fn sprite_palette_color(pram: &Ram, index: u32) -> u32 {
    palette_color(pram, 0x100 + index)
}

/// Reads one of the 32 affine parameter groups out of OAM. Each group packs
/// PA/PB/PC/PD as the `attr3` (bytes 6-7) field of four consecutive 8-byte
/// OAM entries `4*group + 0..=3`, interleaved with the (unused, for these
/// entries) position/appearance attributes (§3, §4.6).
fn sprite_affine_params(oam: &Ram, group: u16) -> (i16, i16, i16, i16) {
    let read_param = |slot: u32| -> i16 {
        let base = (group as u32 * 4 + slot) * 8 + 6;
        (oam.read(base) as u16 | ((oam.read(base + 1) as u16) << 8)) as i16
    };
    (read_param(0), read_param(1), read_param(2), read_param(3))
}

fn sprite_dimensions(shape: u16, size: u16) -> (u32, u32) {
    match (shape, size) {
        (0, 0) => (8, 8),
        (0, 1) => (16, 16),
        (0, 2) => (32, 32),
        (0, 3) => (64, 64),
        (1, 0) => (16, 8),
        (1, 1) => (32, 8),
        (1, 2) => (32, 16),
        (1, 3) => (64, 32),
        (2, 0) => (8, 16),
        (2, 1) => (8, 32),
        (2, 2) => (16, 32),
        (2, 3) => (32, 64),
        _ => (8, 8),
    }
}

/// Samples a single text-BG pixel at tilemap coordinate `(map_x, map_y)`,
/// following the screen-block layout implied by `size` (§4.6).
fn text_bg_pixel(
    vram: &Ram,
    pram: &Ram,
    screen_base: u32,
    char_base: u32,
    bpp8: bool,
    size: u16,
    map_x: u32,
    map_y: u32,
) -> Option<u32> {
    let (blocks_w, blocks_h) = match size {
        0 => (1, 1),
        1 => (2, 1),
        2 => (1, 2),
        _ => (2, 2),
    };
    let wrapped_x = map_x % (blocks_w * 256);
    let wrapped_y = map_y % (blocks_h * 256);
    let block_x = wrapped_x / 256;
    let block_y = wrapped_y / 256;
    let block_index = block_y * blocks_w + block_x;
    let tile_x = (wrapped_x % 256) / 8;
    let tile_y = (wrapped_y % 256) / 8;

    let entry_addr = screen_base + block_index * 0x800 + (tile_y * 32 + tile_x) * 2;
    let entry = vram.read(entry_addr) as u16 | ((vram.read(entry_addr + 1) as u16) << 8);
    let tile_index = entry & 0x3FF;
    let hflip = entry & (1 << 10) != 0;
    let vflip = entry & (1 << 11) != 0;
    let palette_bank = (entry >> 12) & 0xF;

    let mut px = (map_x % 8) as u32;
    let mut py = (map_y % 8) as u32;
    if hflip {
        px = 7 - px;
    }
    if vflip {
        py = 7 - py;
    }

    if bpp8 {
        let tile_base = char_base + tile_index as u32 * 64;
        let idx = vram.read(tile_base + py * 8 + px);
        if idx == 0 {
            None
        } else {
            Some(palette_color(pram, idx as u32))
        }
    } else {
        let tile_base = char_base + tile_index as u32 * 32;
        let byte = vram.read(tile_base + py * 4 + px / 2);
        let idx = if px % 2 == 0 { byte & 0xF } else { byte >> 4 };
        if idx == 0 {
            None
        } else {
            Some(palette_color(pram, palette_bank as u32 * 16 + idx as u32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_length_matches_dot_counts() {
        let p = Ppu::new();
        assert_eq!(p.phase_length(), CYCLES_DRAW);
    }

    #[test]
    fn hblank_flag_set_during_hblank_phase() {
        let mut p = Ppu::new();
        let vram = Ram::new(0x1_8000);
        let oam = Ram::new(0x400);
        let pram = Ram::new(0x400);
        p.advance_phase(&vram, &oam, &pram);
        assert!(p.dispstat() & (1 << 1) != 0);
    }

    #[test]
    fn vblank_begins_at_scanline_160() {
        let mut p = Ppu::new();
        let vram = Ram::new(0x1_8000);
        let oam = Ram::new(0x400);
        let pram = Ram::new(0x400);
        for _ in 0..(SCREEN_HEIGHT * 2) {
            p.advance_phase(&vram, &oam, &pram);
        }
        assert_eq!(p.scanline, SCREEN_HEIGHT as u16);
        assert!(p.dispstat() & 1 != 0);
    }

    #[test]
    fn dispstat_vblank_clears_at_wraparound() {
        let mut p = Ppu::new();
        let vram = Ram::new(0x1_8000);
        let oam = Ram::new(0x400);
        let pram = Ram::new(0x400);
        for _ in 0..(TOTAL_LINES as usize * 2) {
            p.advance_phase(&vram, &oam, &pram);
        }
        assert_eq!(p.scanline, 0);
        assert_eq!(p.dispstat() & 1, 0);
    }

    #[test]
    fn bgr555_conversion_is_full_white() {
        assert_eq!(bgr555_to_rgb888(0x7FFF), 0x00FF_FFFF);
    }

    #[test]
    fn point_in_window_handles_normal_rectangle() {
        assert!(point_in_window((10, 20), (10, 20), 15, 15));
        assert!(!point_in_window((10, 20), (10, 20), 25, 15));
    }

    #[test]
    fn snap_mosaic_rounds_down_to_block_size() {
        assert_eq!(snap_mosaic(5, 4), 4);
        assert_eq!(snap_mosaic(7, 4), 4);
        assert_eq!(snap_mosaic(8, 4), 8);
        assert_eq!(snap_mosaic(-1, 4), -4);
        assert_eq!(snap_mosaic(5, 1), 5); // size 1 (field value 0) disables mosaic
    }

    #[test]
    fn sprite_affine_params_reads_attr3_of_four_consecutive_entries() {
        let mut oam = Ram::new(0x400);
        // Group 2 occupies OAM entries 8..=11; attr3 is bytes 6-7 of each
        // 8-byte entry.
        let write_attr3 = |oam: &mut Ram, entry: u32, value: i16| {
            let base = entry * 8 + 6;
            oam.write(base, value as u16 as u8);
            oam.write(base + 1, (value as u16 >> 8) as u8);
        };
        write_attr3(&mut oam, 8, 0x0100); // PA = 1.0 in Q8.8
        write_attr3(&mut oam, 9, 0);
        write_attr3(&mut oam, 10, 0);
        write_attr3(&mut oam, 11, 0x0100); // PD = 1.0

        let (pa, pb, pc, pd) = sprite_affine_params(&oam, 2);
        assert_eq!((pa, pb, pc, pd), (0x0100, 0, 0, 0x0100));
    }

    fn write_le16(ram: &mut Ram, addr: u32, value: u16) {
        ram.write(addr, value as u8);
        ram.write(addr + 1, (value >> 8) as u8);
    }

    #[test]
    fn affine_sprite_with_identity_matrix_samples_like_a_plain_sprite() {
        let mut p = Ppu::new();
        p.write8(0x00, 0x00); // DISPCNT mode 0
        p.write8(0x01, 0x10); // OBJ enable (bit 12)
        let mut vram = Ram::new(0x1_8000);
        let mut oam = Ram::new(0x400);
        let mut pram = Ram::new(0x400);

        // Entry 0: affine 8x8 sprite at (0,0), tile 1, using affine group 0
        // (so attr3 of entries 0..3 doubles as the identity matrix).
        write_le16(&mut oam, 0, 1 << 8); // attr0: affine bit set, y=0, shape=square
        write_le16(&mut oam, 2, 0); // attr1: x=0, size=0 (8x8), affine group 0
        write_le16(&mut oam, 4, 1); // attr2: tile index 1, priority 0
        write_le16(&mut oam, 6, 0x0100); // group0 PA = 1.0
        write_le16(&mut oam, 8 + 6, 0); // group0 PB = 0 (entry 1's attr3)
        write_le16(&mut oam, 16 + 6, 0); // group0 PC = 0 (entry 2's attr3)
        write_le16(&mut oam, 24 + 6, 0x0100); // group0 PD = 1.0 (entry 3's attr3)

        // Palette bank 0, colour index 1 is opaque white; tile 1's top-left
        // texel (px 0, py 0) is index 1, stored in the low nibble of the
        // tile's first byte. Sprite palette entry (bank 0, index 1) lives at
        // PRAM word 0x101 (§3: OBJ palette occupies the upper 256 entries).
        write_le16(&mut pram, 0x101 * 2, 0x7FFF);
        vram.write(0x1_0000 + 32, 0x01);

        let mut obj_color = [None; SCREEN_WIDTH];
        let mut obj_priority = [i32::MAX; SCREEN_WIDTH];
        let mut obj_semi = [false; SCREEN_WIDTH];
        let mut obj_window = [false; SCREEN_WIDTH];
        p.render_sprites(&vram, &oam, &pram, &mut obj_color, &mut obj_priority, &mut obj_semi, &mut obj_window);

        assert_eq!(obj_color[0], Some(0x00FF_FFFF));
        assert_eq!(obj_priority[0], 0);
    }

    #[test]
    fn affine_reference_point_accumulates_pb_pd_per_scanline_and_relatches_at_vblank() {
        let mut p = Ppu::new();
        // BG2 affine group: PB/PD = 1.0 in Q8.8 (pure vertical step per
        // line), reference point (X0,Y0) = 0.
        p.write16(0x22, 0x0100); // BG2PB
        p.write16(0x26, 0x0100); // BG2PD
        p.latch_affine_reference();
        assert_eq!(p.affine_ref[0], (0, 0));

        p.advance_affine_reference();
        assert_eq!(p.affine_ref[0], (0, 0x100));
        p.advance_affine_reference();
        assert_eq!(p.affine_ref[0], (0, 0x200));

        // A fresh latch (as happens at VBlank start) snaps back to the
        // register's reference point instead of continuing to accumulate.
        p.latch_affine_reference();
        assert_eq!(p.affine_ref[0], (0, 0));
    }
}
