//! The in-page extraction library, shipped as JS source.
//!
//! Injected into every page before page scripts run. Installs the public
//! globals (`scrape`, `scrapeSchema`, `scrapeList`, `scrapeListAuto`,
//! `scrollDown`, `scrollUp`) plus the `window.__scrapeflow` helper
//! namespace used by the host side (selector resolution, presence probes,
//! document metrics).
//!
//! The selector resolver understands CSS, XPath (prefix `//`, `/`, `./` or
//! XPath-only syntax, with silent CSS fallback), shadow-piercing `a >> b`
//! over open shadow roots, and frame-piercing `a :>> b` over same-origin
//! frames. Both traversals are capped at 4 nesting levels and bounded per
//! level to avoid combinatorial blow-up.

/// Complete library source. Idempotent: re-evaluation is a no-op.
pub const LIBRARY: &str = r#"
(() => {
    if (window.__scrapeflow && window.__scrapeflow.version === 2) return;

    const MAX_PIERCE_DEPTH = 4;
    const LEVEL_BUDGET = 64;
    const RESULT_BUDGET = 5000;

    const XPATH_HINTS = ['contains(@', '[count(', '@class=', '@id=', ' and ', ' or '];

    function isXPath(selector) {
        if (selector.startsWith('//') || selector.startsWith('/') || selector.startsWith('./')) {
            return true;
        }
        return XPATH_HINTS.some(hint => selector.includes(hint));
    }

    function queryAllIn(root, selector) {
        if (isXPath(selector)) {
            try {
                const doc = root.ownerDocument || root;
                const snap = doc.evaluate(selector, root, null,
                    XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                const out = [];
                for (let i = 0; i < snap.snapshotLength && i < RESULT_BUDGET; i++) {
                    const node = snap.snapshotItem(i);
                    if (node && node.nodeType === Node.ELEMENT_NODE) out.push(node);
                }
                return out;
            } catch (e) {
                // Not actually XPath after all; fall through to CSS.
            }
        }
        try {
            return Array.from(root.querySelectorAll(selector)).slice(0, RESULT_BUDGET);
        } catch (e) {
            return [];
        }
    }

    function splitLevels(selector, token) {
        return selector.split(token).map(p => p.trim()).filter(p => p.length > 0)
            .slice(0, MAX_PIERCE_DEPTH + 1);
    }

    function pierceShadow(parts) {
        let roots = [document];
        const results = [];
        for (let level = 0; level < parts.length; level++) {
            const last = level === parts.length - 1;
            const next = [];
            for (const root of roots) {
                for (const el of queryAllIn(root, parts[level])) {
                    if (last) {
                        results.push(el);
                        if (results.length >= RESULT_BUDGET) return results;
                    } else if (el.shadowRoot) {
                        next.push(el.shadowRoot);
                        if (next.length >= LEVEL_BUDGET) break;
                    }
                }
            }
            roots = next;
            if (!last && roots.length === 0) return results;
        }
        return results;
    }

    function pierceFrames(parts) {
        let roots = [document];
        const results = [];
        for (let level = 0; level < parts.length; level++) {
            const last = level === parts.length - 1;
            const next = [];
            for (const root of roots) {
                for (const el of queryAllIn(root, parts[level])) {
                    if (last) {
                        results.push(el);
                        if (results.length >= RESULT_BUDGET) return results;
                    } else if (el.tagName === 'IFRAME' || el.tagName === 'FRAME') {
                        try {
                            if (el.contentDocument) {
                                next.push(el.contentDocument);
                                if (next.length >= LEVEL_BUDGET) break;
                            }
                        } catch (e) {
                            // Cross-origin frame; skip.
                        }
                    }
                }
            }
            roots = next;
            if (!last && roots.length === 0) return results;
        }
        return results;
    }

    function findAllElements(selector) {
        if (selector.includes(':>>')) return pierceFrames(splitLevels(selector, ':>>'));
        if (selector.includes('>>')) return pierceShadow(splitLevels(selector, '>>'));
        return queryAllIn(document, selector);
    }

    function queryFirst(selector) {
        const all = findAllElements(selector);
        return all.length > 0 ? all[0] : null;
    }

    function lastSegment(selector) {
        const parts = selector.includes(':>>') ? selector.split(':>>') : selector.split('>>');
        return parts[parts.length - 1].trim();
    }

    function toAbsolute(url) {
        if (!url) return url;
        try {
            return new URL(url, document.baseURI).href;
        } catch (e) {
            return url;
        }
    }

    function extractAttribute(el, attribute) {
        if (!el) return undefined;
        if (attribute === 'href' || attribute === 'src') {
            const raw = el.getAttribute(attribute);
            return raw ? toAbsolute(raw) : undefined;
        }
        if (attribute === 'innerText') {
            return (el.innerText || '').trim();
        }
        if (attribute === 'textContent') {
            return (el.textContent || '').trim();
        }
        const value = el.getAttribute(attribute);
        if (value !== null && value !== undefined && value !== '') return value;
        return (el.innerText || '').trim();
    }

    function classSet(el) {
        return new Set(Array.from(el.classList));
    }

    function jaccard(a, b) {
        if (a.size === 0 && b.size === 0) return 1;
        let intersection = 0;
        for (const item of a) if (b.has(item)) intersection++;
        const union = a.size + b.size - intersection;
        return union === 0 ? 0 : intersection / union;
    }

    function cssPath(el) {
        const segments = [];
        let node = el;
        while (node && node.nodeType === Node.ELEMENT_NODE && node !== document.documentElement) {
            let segment = node.tagName.toLowerCase();
            if (node.id) {
                segments.unshift(segment + '#' + node.id);
                break;
            }
            const parent = node.parentElement;
            if (parent) {
                const sameTag = Array.from(parent.children)
                    .filter(sibling => sibling.tagName === node.tagName);
                if (sameTag.length > 1) {
                    segment += ':nth-of-type(' + (sameTag.indexOf(node) + 1) + ')';
                }
            }
            segments.unshift(segment);
            node = parent;
        }
        return segments.join(' > ');
    }

    // ---- fingerprint-based list discovery ----------------------------------

    function fingerprint(el) {
        const classes = Array.from(el.classList).sort().join('.');
        const childTags = Array.from(el.children).map(c => c.tagName).join(',');
        return el.tagName + '|' + classes + '|' + childTags;
    }

    function discoverList() {
        const groups = new Map();
        for (const el of document.body.querySelectorAll('*')) {
            const parent = el.parentElement;
            if (!parent) continue;
            const key = fingerprint(el);
            let byParent = groups.get(key);
            if (!byParent) {
                byParent = new Map();
                groups.set(key, byParent);
            }
            let members = byParent.get(parent);
            if (!members) {
                members = [];
                byParent.set(parent, members);
            }
            members.push(el);
        }
        let best = [];
        for (const byParent of groups.values()) {
            for (const members of byParent.values()) {
                if (members.length >= 3 && members.length > best.length) {
                    best = members;
                }
            }
        }
        return best.length > 0 ? best : Array.from(document.body.children);
    }

    // ---- scrape ------------------------------------------------------------

    function flattenElement(el) {
        const record = {};
        const images = el.querySelectorAll('img');
        images.forEach((img, index) => {
            let url = null;
            const srcset = img.getAttribute('srcset');
            if (srcset) {
                const candidates = srcset.split(',').map(c => c.trim().split(/\s+/)[0])
                    .filter(c => c.length > 0);
                if (candidates.length > 0) url = candidates[candidates.length - 1];
            }
            if (!url) {
                const src = img.getAttribute('src');
                if (src && !src.startsWith('data:')) url = src;
            }
            if (url) record['img_' + index] = toAbsolute(url);
        });
        const lines = (el.innerText || '').split('\n')
            .map(line => line.trim()).filter(line => line.length > 0);
        lines.forEach((line, index) => {
            record['record_' + String(index).padStart(4, '0')] = line;
        });
        return record;
    }

    function scrape(selector) {
        const elements = selector ? findAllElements(selector) : discoverList();
        return elements.map(flattenElement);
    }

    // ---- scrapeSchema: Minimal-Bounding-Element grouping -------------------

    function minimalBoundingElement(seed, seeds) {
        let node = seed;
        while (node.parentElement && node.parentElement !== document.documentElement) {
            const parent = node.parentElement;
            const containsOther = seeds.some(other => other !== seed && parent.contains(other));
            if (containsOther) break;
            node = parent;
        }
        return node;
    }

    function scrapeSchema(schema) {
        const keys = Object.keys(schema);
        if (keys.length === 0) return [];

        const matches = {};
        for (const key of keys) {
            matches[key] = findAllElements(schema[key].selector);
        }

        let seedKey = keys[0];
        for (const key of keys) {
            if (matches[key].length > matches[seedKey].length) seedKey = key;
        }
        const seeds = matches[seedKey];
        if (seeds.length === 0) return [];

        const records = [];
        let incomplete = false;
        for (const seed of seeds) {
            const bound = minimalBoundingElement(seed, seeds);
            const record = {};
            for (const key of keys) {
                const hit = matches[key].find(el => bound.contains(el));
                const value = extractAttribute(hit, schema[key].attribute);
                if (value === undefined) {
                    incomplete = true;
                } else {
                    record[key] = value;
                }
            }
            records.push(record);
        }
        if (!incomplete) return records;

        // Some field never resolved inside its group: fall back to
        // independent extraction, index-aligned across the whole document.
        const length = Math.max(...keys.map(key => matches[key].length));
        const aligned = [];
        for (let i = 0; i < length; i++) {
            const record = {};
            for (const key of keys) {
                const value = extractAttribute(matches[key][i], schema[key].attribute);
                if (value !== undefined) record[key] = value;
            }
            aligned.push(record);
        }
        return aligned;
    }

    // ---- scrapeList --------------------------------------------------------

    function expandContainers(containers, limit) {
        if (containers.length !== 1 || limit <= 1) return containers;
        const anchor = containers[0];
        const parent = anchor.parentElement;
        if (!parent) return containers;
        const anchorClasses = classSet(anchor);
        const expanded = containers.slice();
        for (const sibling of Array.from(parent.children)) {
            if (sibling === anchor) continue;
            if (sibling.tagName !== anchor.tagName) continue;
            if (jaccard(anchorClasses, classSet(sibling)) >= 0.7) {
                expanded.push(sibling);
            }
        }
        return expanded;
    }

    function probeSample(container, selector) {
        const relative = lastSegment(selector);
        try {
            const hit = container.querySelector(relative);
            if (hit) return hit;
        } catch (e) { /* fall through */ }
        const global = queryFirst(selector);
        if (global && container.contains(global)) return global;
        return global;
    }

    function classifyField(sample) {
        let node = sample;
        for (let depth = 0; depth < 5 && node; depth++) {
            if (node.tagName === 'TD' || node.tagName === 'TH') {
                return { table: true, cellIndex: node.cellIndex };
            }
            if (node.tagName === 'TR') {
                return { table: true, cellIndex: -1 };
            }
            node = node.parentElement;
        }
        return { table: false, cellIndex: -1 };
    }

    function enclosingTable(sample) {
        let node = sample;
        while (node && node.tagName !== 'TABLE') node = node.parentElement;
        return node;
    }

    function tableRows(table) {
        const rows = Array.from(table.querySelectorAll('tr'));
        for (const host of table.querySelectorAll('*')) {
            if (host.shadowRoot) {
                rows.push(...host.shadowRoot.querySelectorAll('tr'));
            }
        }
        return rows;
    }

    function stripClassSuffix(selector) {
        return selector.replace(/\.[^.\s>:]+$/, '');
    }

    function greedyDescend(root, attribute) {
        let node = root;
        while (node) {
            const value = extractAttribute(node, attribute);
            if (value !== undefined && value !== '') return value;
            node = node.firstElementChild;
        }
        return undefined;
    }

    function cellValue(row, field) {
        const attribute = field.def.attribute;
        if (field.cellIndex >= 0) {
            const cell = row.children[field.cellIndex];
            if (cell) return extractAttribute(cell, attribute);
        }
        let relative = lastSegment(field.def.selector);
        let hit = null;
        try { hit = row.querySelector(relative); } catch (e) { /* invalid relative */ }
        if (!hit) {
            const stripped = stripClassSuffix(relative);
            if (stripped !== relative && stripped.length > 0) {
                try { hit = row.querySelector(stripped); } catch (e) { /* ignore */ }
            }
        }
        if (hit) return extractAttribute(hit, attribute);
        return greedyDescend(row, attribute);
    }

    function scrapeList(config) {
        const limit = config.limit && config.limit > 0 ? config.limit : Infinity;
        const fields = config.fields || {};
        let containers = findAllElements(config.listSelector);
        containers = expandContainers(containers, limit);
        if (containers.length === 0) return [];

        const tableFields = [];
        const plainFields = [];
        let headerFieldPresent = false;
        for (const name of Object.keys(fields)) {
            const def = fields[name];
            const sample = probeSample(containers[0], def.selector);
            if (!sample) {
                plainFields.push({ name, def });
                continue;
            }
            const kind = classifyField(sample);
            if (kind.table) {
                tableFields.push({ name, def, cellIndex: kind.cellIndex, sample });
                if (sample.closest && sample.closest('th')) headerFieldPresent = true;
            } else {
                plainFields.push({ name, def });
            }
        }

        const rows = [];

        if (tableFields.length > 0) {
            const table = enclosingTable(tableFields[0].sample);
            if (table) {
                for (const row of tableRows(table)) {
                    if (rows.length >= limit) break;
                    if (!headerFieldPresent && !row.querySelector('td')) continue;
                    const record = {};
                    for (const field of tableFields) {
                        const value = cellValue(row, field);
                        if (value !== undefined) record[field.name] = value;
                    }
                    if (Object.keys(record).length > 0) rows.push(record);
                }
            }
        }

        if (plainFields.length > 0) {
            for (const container of containers) {
                if (rows.length >= limit) break;
                const record = {};
                for (const field of plainFields) {
                    const relative = lastSegment(field.def.selector);
                    let hit = null;
                    try { hit = container.querySelector(relative); } catch (e) { /* ignore */ }
                    const value = extractAttribute(hit, field.def.attribute);
                    if (value !== undefined) record[field.name] = value;
                }
                if (Object.keys(record).length > 0) rows.push(record);
            }
        }

        return rows.slice(0, limit === Infinity ? rows.length : limit);
    }

    function scrapeListAuto(listSelector) {
        const containers = findAllElements(listSelector);
        const out = [];
        for (const container of containers) {
            for (const child of Array.from(container.children)) {
                out.push({
                    selector: cssPath(child),
                    innerText: (child.innerText || '').trim()
                });
            }
        }
        return out;
    }

    // ---- scrolling ---------------------------------------------------------

    function scrollDown(pages) {
        window.scrollBy(0, (pages || 1) * window.innerHeight);
    }

    function scrollUp(pages) {
        window.scrollBy(0, -(pages || 1) * window.innerHeight);
    }

    // ---- host-side helpers -------------------------------------------------

    window.__scrapeflow = {
        version: 2,
        findAllElements,
        queryFirst,
        discoverList,
        scrapeHeuristics: () => discoverList().map(flattenElement),
        documentHeight: () => document.body ? document.body.scrollHeight : 0,
        scrollToBottom: () => window.scrollTo(0, document.body.scrollHeight),
        scrollToTop: () => window.scrollTo(0, 0),
        presentSelectors: (selectors) =>
            selectors.filter(sel => queryFirst(sel) !== null),
        dispatchClick: (selector) => {
            const el = queryFirst(selector);
            if (!el) return false;
            el.dispatchEvent(new MouseEvent('click', {
                bubbles: true, cancelable: true, view: window
            }));
            return true;
        }
    };

    window.scrape = scrape;
    window.scrapeSchema = scrapeSchema;
    window.scrapeList = scrapeList;
    window.scrapeListAuto = scrapeListAuto;
    window.scrollDown = scrollDown;
    window.scrollUp = scrollUp;
})()
"#;
