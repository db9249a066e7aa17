//! The runtime interface shim: C declarations of every runtime entry
//! point the emitter may call, plus the small arithmetic helpers that
//! keep integer semantics (wrapping, floor division) out of
//! undefined-behavior territory.
//!
//! This prelude is pasted verbatim at the top of every generated file;
//! its signatures are the single place where the emitted code and the
//! runtime library have to agree.

/// The C prelude emitted before any generated code.
pub const RUNTIME_PRELUDE: &str = r#"/* generated by pyrite; do not edit */
#include <stdint.h>
#include <stdbool.h>
#include <stddef.h>

typedef uint64_t RtRef;
typedef uint64_t RtTask;
typedef struct { uint32_t tag; uint64_t bits; } RtVal;
typedef struct { uint32_t status; RtVal value; uint64_t task; } RtPoll;
typedef RtPoll (*RtResumeFn)(RtRef frame, uint32_t cancel);

#define RT_POLL_DONE 0u
#define RT_POLL_YIELDED 1u
#define RT_POLL_AWAITING 2u
#define RT_POLL_CANCELLED 3u

/* core */
extern void rt_init(void);
extern RtRef heap_alloc(uint32_t type_tag, uint64_t nbytes);
extern uint8_t* frame_ptr(RtRef handle);
extern void rc_inc(RtRef handle);
extern void rc_dec(RtRef handle);
extern void rt_print(const RtVal* args, uint64_t n);

/* dynamic values */
extern RtVal val_none(void);
extern RtVal val_from_int(int64_t v);
extern RtVal val_from_float(double v);
extern RtVal val_from_bool(bool v);
extern RtVal val_from_ref(RtRef handle);
extern int64_t val_as_int(RtVal v);
extern double val_as_float(RtVal v);
extern bool val_as_bool(RtVal v);
extern RtRef val_as_ref(RtVal v);
extern bool val_truthy(RtVal v);
extern bool val_eq(RtVal a, RtVal b);
extern RtRef str_of_val(RtVal v);
extern RtVal dyn_binop(uint32_t op, RtVal a, RtVal b);
extern bool dyn_cmp(uint32_t op, RtVal a, RtVal b);
extern RtVal dyn_attr_get(RtVal obj, const uint8_t* name, uint64_t len);

/* strings and bytes */
extern RtRef str_new(const uint8_t* ptr, uint64_t len);
extern RtRef str_concat(RtRef a, RtRef b);
extern int64_t str_len(RtRef s);
extern bool str_eq(RtRef a, RtRef b);
extern bool str_contains(RtRef hay, RtRef needle);
extern RtRef str_index(RtRef s, int64_t i);
extern RtRef str_slice(RtRef s, int64_t start, int64_t stop, int64_t step);
extern int64_t str_find(RtRef hay, RtRef needle);
extern RtRef str_upper(RtRef s);
extern RtRef str_lower(RtRef s);
extern RtRef str_strip(RtRef s);
extern RtRef str_replace(RtRef s, RtRef from, RtRef to);
extern RtRef str_from_int(int64_t v);
extern RtRef str_from_float(double v);
extern RtRef str_from_bool(bool v);
extern int64_t str_to_int(RtRef s);
extern double str_to_float(RtRef s);
extern RtRef bytes_new(const uint8_t* ptr, uint64_t len);
extern int64_t bytes_len(RtRef b);

/* containers */
extern RtRef list_new(uint64_t cap);
extern void list_push(RtRef list, RtVal item);
extern RtVal list_get(RtRef list, int64_t i);
extern void list_set(RtRef list, int64_t i, RtVal v);
extern int64_t list_len(RtRef list);
extern RtVal list_pop(RtRef list, int64_t i);
extern void list_insert(RtRef list, int64_t i, RtVal v);
extern void list_remove(RtRef list, RtVal v);
extern int64_t list_index(RtRef list, RtVal v);
extern int64_t list_count(RtRef list, RtVal v);
extern bool list_contains(RtRef list, RtVal v);
extern void list_sort(RtRef list);
extern void list_reverse(RtRef list);
extern RtRef list_slice(RtRef list, int64_t start, int64_t stop, int64_t step);
extern RtRef list_concat(RtRef a, RtRef b);
extern RtRef dict_new(uint64_t cap);
extern void dict_put(RtRef dict, RtVal key, RtVal value);
extern RtVal dict_get(RtRef dict, RtVal key);
extern RtVal dict_get_default(RtRef dict, RtVal key, RtVal fallback);
extern bool dict_contains(RtRef dict, RtVal key);
extern int64_t dict_len(RtRef dict);
extern RtRef dict_keys(RtRef dict);
extern RtRef dict_values(RtRef dict);
extern RtRef dict_items(RtRef dict);
extern RtRef set_new(void);
extern void set_add(RtRef set, RtVal v);
extern bool set_contains(RtRef set, RtVal v);
extern int64_t set_len(RtRef set);
extern RtRef tuple_new(const RtVal* items, uint64_t n);
extern RtVal tuple_get(RtRef tuple, int64_t i);
extern int64_t tuple_len(RtRef tuple);

/* classes */
extern void class_register(uint32_t id, const uint8_t* name, uint64_t name_len, uint32_t base_plus1);
extern void class_add_field(uint32_t id, const uint8_t* name, uint64_t name_len);
extern void class_add_method(uint32_t id, const uint8_t* name, uint64_t name_len, uint64_t fn_addr);
extern RtRef obj_new(uint32_t class_id, uint64_t nfields);
extern uint32_t obj_class(RtRef obj);
extern RtVal attr_get(RtRef obj, uint32_t field);
extern void attr_set(RtRef obj, uint32_t field, RtVal value);
extern uint64_t obj_vmethod(RtRef obj, uint32_t slot);

/* exceptions */
extern void throw(uint32_t kind, const uint8_t* msg, uint64_t len);
extern void throw_obj(RtRef obj, uint32_t class_id);
extern void try_push(void);
extern void try_pop(void);
extern bool exc_pending(void);
extern uint32_t exc_kind(void);
extern bool exc_matches(uint32_t kind, uint32_t class_plus1);
extern RtVal exc_value(void);
extern void exc_clear(void);
extern void exc_print(void);

/* scheduler */
extern RtTask scheduler_spawn(RtResumeFn resume, RtRef frame);
extern RtVal scheduler_await(RtTask task);
extern RtTask scheduler_sleep(uint64_t ms);
extern void scheduler_cancel(RtTask task);
extern RtTask scheduler_gather(const RtTask* tasks, uint64_t n);
extern RtTask scheduler_gather_list(RtRef list);
extern RtTask scheduler_wait_for(RtTask task, uint64_t ms);
extern RtVal task_result(RtTask task);
extern bool task_done(RtTask task);
extern bool task_cancelled(RtTask task);
extern void shield_enter(void);
extern void shield_exit(void);
extern RtRef queue_new(int64_t cap);
extern RtTask queue_put(RtRef queue, RtVal v);
extern RtTask queue_get(RtRef queue);
extern void queue_put_nowait(RtRef queue, RtVal v);
extern RtVal queue_get_nowait(RtRef queue);

/* built-in modules */
extern RtRef json_dumps(RtVal v);
extern RtVal json_loads(RtRef s);
extern double math_sqrt(double x);
extern double math_pow(double x, double y);
extern double math_log(double x);
extern double math_exp(double x);
extern double math_sin(double x);
extern double math_cos(double x);
extern int64_t math_floor(double x);
extern int64_t math_ceil(double x);
extern double math_fabs(double x);
extern RtRef hashlib_md5_hexdigest(RtRef data);
extern RtRef hashlib_sha1_hexdigest(RtRef data);
extern RtRef hashlib_sha256_hexdigest(RtRef data);
extern RtVal re_match(RtRef pattern, RtRef text);
extern RtRef re_findall(RtRef pattern, RtRef text);
extern RtRef re_sub(RtRef pattern, RtRef repl, RtRef text);
extern RtVal os_getenv(RtRef name);
extern bool os_path_exists(RtRef path);
extern RtRef zlib_compress(RtRef data);
extern RtRef zlib_decompress(RtRef data);

/* arbitrary-precision integers */
extern RtRef big_from_i64(int64_t v);
extern RtRef big_from_f64(double v);
extern RtRef big_from_str(const uint8_t* ptr, uint64_t len);
extern RtRef big_add(RtRef a, RtRef b);
extern RtRef big_sub(RtRef a, RtRef b);
extern RtRef big_mul(RtRef a, RtRef b);
extern RtRef big_pow(RtRef base, uint32_t exp);
extern bool big_eq(RtRef a, RtRef b);
extern int32_t big_cmp(RtRef a, RtRef b);
extern int64_t big_to_i64(RtRef v);

/* integer semantics helpers: wrapping arithmetic and Python floor
 * division/modulo. Zero divisors are checked at the call site. */
static inline int64_t rt_wadd(int64_t a, int64_t b) { return (int64_t)((uint64_t)a + (uint64_t)b); }
static inline int64_t rt_wsub(int64_t a, int64_t b) { return (int64_t)((uint64_t)a - (uint64_t)b); }
static inline int64_t rt_wmul(int64_t a, int64_t b) { return (int64_t)((uint64_t)a * (uint64_t)b); }
static inline int64_t rt_wneg(int64_t a) { return (int64_t)(0u - (uint64_t)a); }
static inline int64_t rt_ifloordiv(int64_t a, int64_t b) {
    int64_t q = a / b;
    if ((a % b != 0) && ((a < 0) != (b < 0))) q -= 1;
    return q;
}
static inline int64_t rt_imod(int64_t a, int64_t b) {
    int64_t r = a % b;
    if (r != 0 && ((r < 0) != (b < 0))) r += b;
    return r;
}
static inline int64_t rt_ipow(int64_t base, int64_t exp) {
    int64_t result = 1;
    while (exp > 0) {
        if (exp & 1) result = rt_wmul(result, base);
        base = rt_wmul(base, base);
        exp >>= 1;
    }
    return result;
}
"#;

/// Discriminants the emitter embeds for `throw` and `exc_matches`.
pub fn exc_discriminant(kind: pyrite_runtime::ExcKind) -> u32 {
    kind as u32
}
