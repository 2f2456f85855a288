mod http_api;
mod test_utils;
